use thiserror::Error;

#[derive(Error, PartialEq, Debug)]
pub enum InvoiceError {
    #[error("Bech32 error: {0}")]
    Bech32Error(bech32::Error),
    #[error("Unknown currency")]
    UnknownCurrency,
    #[error("Unknown si prefix")]
    UnknownSiPrefix,
    #[error("Malformed HRP")]
    MalformedHRP,
    #[error("Failed to parse amount")]
    ParseAmountError,
    #[error("Amount out of range")]
    AmountOutOfRange,
    #[error("Sub-millisatoshi precision is not supported")]
    SubMsatPrecision,
    #[error("Too short data part")]
    TooShortDataPart,
    #[error("Unexpected end of tagged fields")]
    UnexpectedEndOfTaggedFields,
    #[error("Invalid recovery id")]
    InvalidRecoveryId,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid slice length: {0}")]
    InvalidSliceLength(String),
    #[error("No payment hash")]
    NoPaymentHash,
    #[error("Missing description or description hash")]
    NoDescription,
    #[error("Both description and description hash are set")]
    BothDescriptionAndHash,
    #[error("Both payment_hash and payment_preimage are set")]
    BothPaymenthashAndPreimage,
    #[error("Duplicated attribute: {0}")]
    DuplicatedAttribute(String),
    #[error("Description too long: {0}")]
    DescriptionTooLong(usize),
    #[error("Expiry out of range")]
    ExpiryOutOfRange,
    #[error("Invalid utf-8 in description")]
    InvalidUtf8,
}
