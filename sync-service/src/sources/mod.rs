pub mod powershaper;
pub mod request;

pub use powershaper::{
    AccountInfo, Credential, DateRange, HttpMeterApi, MeterApi, RawRecord, DEFAULT_AUTH_URL,
    DEFAULT_DATA_BASE_URL,
};
pub use request::{build_request, Aggregate, RequestDescriptor};
