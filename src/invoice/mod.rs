mod errors;
mod invoice_impl;
mod utils;

#[cfg(test)]
mod tests;

pub use errors::InvoiceError;
pub use invoice_impl::{
    Attribute, Bolt11Invoice, Currency, InvoiceBuilder, InvoiceData, InvoiceSignature,
    RouteHintHop, MAX_AMOUNT_MSAT,
};
