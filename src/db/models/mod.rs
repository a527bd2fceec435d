pub mod confirmation;

pub use confirmation::ConfirmationRecord;
