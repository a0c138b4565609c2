pub mod confirmation_token;
pub mod delivery_report;
pub mod order;
pub mod product;

pub use confirmation_token::Entity as ConfirmationToken;
pub use delivery_report::Entity as DeliveryReport;
pub use order::Entity as Order;
pub use product::Entity as Product;
