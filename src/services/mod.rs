pub mod orders;
pub mod reconciler;
