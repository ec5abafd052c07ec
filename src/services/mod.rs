pub mod account_service;
pub mod input_service;
pub mod output_service;
pub mod payment_data;
pub mod validation;
pub mod verify_service;

pub use input_service::{DirInputSource, InputSource};
pub use output_service::{OutputSink, ResultRecord};
pub use payment_data::{PaymentDataProvider, PaymentPools};
pub use verify_service::VerifyClient;
