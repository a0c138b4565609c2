pub mod delivery_confirmation;
pub mod delivery_fee;
pub mod orders;
pub mod payments;
pub mod stock;
