pub mod check;
pub mod reconcile;
