pub mod poller;
pub mod reconciler;
pub mod store;
pub mod view;
