pub mod stripe;

pub use stripe::StripePaymentProvider;
