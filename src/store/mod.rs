pub mod db;
pub mod fines;
pub mod ledger;
pub mod subscriptions;

pub use db::Db;
pub use fines::FineStore;
pub use ledger::NotificationLedger;
pub use subscriptions::SubscriptionStore;
