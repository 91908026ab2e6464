use std::cmp::Ordering;
use std::str::FromStr;

use bech32::{encode, u5, FromBase32, ToBase32, Variant, WriteBase32};
use bitcoin::hashes::{sha256, Hash as _};
use nom::combinator::all_consuming;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::Message;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::invoice::InvoiceError;
use crate::now_timestamp_as_secs_u64;
use crate::router::types::{secp256k1_instance, Hash256, Pubkey, ShortChannelId};

use super::utils::{bytes_to_u5, invoice_signing_bytes, nom_scan_hrp};

pub(crate) const SIGNATURE_U5_SIZE: usize = 104;
pub(crate) const TIMESTAMP_U5_SIZE: usize = 7;
pub(crate) const MAX_DESCRIPTION_LENGTH: usize = 639;
/// Largest payable amount: amounts must be in (0, 2^32] msat.
pub const MAX_AMOUNT_MSAT: u64 = 1 << 32;
/// The expiry payload is two 5-bit groups.
const MAX_EXPIRY_SECS: u64 = (1 << 10) - 1;

// Tag letters, as values in the bech32 charset.
const TAG_PAYMENT_HASH: u8 = 1; // p
const TAG_ROUTING_HINT: u8 = 3; // r
const TAG_EXPIRY: u8 = 6; // x
const TAG_FALLBACK_ADDR: u8 = 9; // f
const TAG_DESCRIPTION: u8 = 13; // d
const TAG_DESCRIPTION_HASH: u8 = 23; // h

/// msat per unit for the m/u/n multipliers. A pico unit is a tenth of a
/// millisatoshi and is handled separately.
const MSAT_PER_MILLI: u64 = 100_000_000;
const MSAT_PER_MICRO: u64 = 100_000;
const MSAT_PER_NANO: u64 = 100;
const MSAT_PER_BTC: u64 = 100_000_000_000;

/// The network an invoice is payable on, encoded in the HRP.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Currency {
    Bitcoin,
    BitcoinTestnet,
}

impl Currency {
    fn hrp_prefix(&self) -> &'static str {
        match self {
            Currency::Bitcoin => "bc",
            Currency::BitcoinTestnet => "tb",
        }
    }
}

impl FromStr for Currency {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bc" => Ok(Self::Bitcoin),
            "tb" => Ok(Self::BitcoinTestnet),
            _ => Err(InvoiceError::UnknownCurrency),
        }
    }
}

/// One hop of a private routing hint.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RouteHintHop {
    pub node_id: Pubkey,
    pub short_channel_id: ShortChannelId,
    pub fee_msat: u64,
    pub cltv_expiry_delta: u16,
}

impl RouteHintHop {
    const ENCODED_LENGTH: usize = 33 + 8 + 8 + 2;

    fn write_to(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.node_id.serialize());
        bytes.extend_from_slice(&self.short_channel_id.as_u64().to_be_bytes());
        bytes.extend_from_slice(&self.fee_msat.to_be_bytes());
        bytes.extend_from_slice(&self.cltv_expiry_delta.to_be_bytes());
    }

    fn from_slice(chunk: &[u8]) -> Result<Self, InvoiceError> {
        debug_assert_eq!(chunk.len(), Self::ENCODED_LENGTH);
        let node_id = Pubkey::from_slice(&chunk[0..33])
            .map_err(|_| InvoiceError::InvalidSliceLength("routing hint pubkey".into()))?;
        let short_channel_id =
            ShortChannelId::from(u64::from_be_bytes(chunk[33..41].try_into().unwrap()));
        let fee_msat = u64::from_be_bytes(chunk[41..49].try_into().unwrap());
        let cltv_expiry_delta = u16::from_be_bytes(chunk[49..51].try_into().unwrap());
        Ok(Self {
            node_id,
            short_channel_id,
            fee_msat,
            cltv_expiry_delta,
        })
    }
}

/// The tagged fields other than the mandatory payment hash.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Description(String),
    DescriptionHash(Hash256),
    FallbackAddr { version: u8, hash: Vec<u8> },
    RoutingHint(Vec<RouteHintHop>),
    ExpiryTime(u64),
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    /// Seconds since the unix epoch, 35 bits on the wire.
    pub timestamp: u64,
    pub payment_hash: Hash256,
    pub attrs: Vec<Attribute>,
}

/// A syntactically and semantically valid BOLT-11 invoice.
///
/// Construct one with [`InvoiceBuilder`] or parse one with
/// `str::parse::<Bolt11Invoice>(&str)`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Bolt11Invoice {
    pub currency: Currency,
    pub amount_msat: Option<u64>,
    /// The payee. Populated by signing or by public key recovery on
    /// decode; a signature that does not recover to this key is invalid.
    pub node_id: Option<Pubkey>,
    pub signature: Option<InvoiceSignature>,
    pub data: InvoiceData,
}

macro_rules! attr_getter {
    ($name:ident, $attr_name:ident, $attr:ty) => {
        pub fn $name(&self) -> Option<&$attr> {
            self.data
                .attrs
                .iter()
                .filter_map(|attr| match attr {
                    Attribute::$attr_name(val) => Some(val),
                    _ => None,
                })
                .next()
        }
    };
}

impl Bolt11Invoice {
    fn hrp_part(&self) -> String {
        format!(
            "ln{}{}",
            self.currency.hrp_prefix(),
            self.amount_msat
                .map_or_else(String::new, encode_amount_part),
        )
    }

    /// Timestamp and tagged fields as 5-bit groups, without the signature.
    fn data_part(&self) -> Vec<u5> {
        let mut data = Vec::new();
        for i in (0..TIMESTAMP_U5_SIZE).rev() {
            let group = ((self.data.timestamp >> (5 * i)) & 0x1f) as u8;
            data.push(u5::try_from_u8(group).expect("5 bit group"));
        }
        write_tagged_field(
            &mut data,
            TAG_PAYMENT_HASH,
            bytes_to_u5(self.data.payment_hash.as_ref()),
        );
        for attr in &self.data.attrs {
            let (tag, payload) = match attr {
                Attribute::Description(description) => {
                    (TAG_DESCRIPTION, bytes_to_u5(description.as_bytes()))
                }
                Attribute::DescriptionHash(hash) => {
                    (TAG_DESCRIPTION_HASH, bytes_to_u5(hash.as_ref()))
                }
                Attribute::FallbackAddr { version, hash } => {
                    let mut bytes = vec![*version];
                    bytes.extend_from_slice(hash);
                    (TAG_FALLBACK_ADDR, bytes_to_u5(&bytes))
                }
                Attribute::RoutingHint(hops) => {
                    let mut bytes = Vec::with_capacity(hops.len() * RouteHintHop::ENCODED_LENGTH);
                    for hop in hops {
                        hop.write_to(&mut bytes);
                    }
                    (TAG_ROUTING_HINT, bytes_to_u5(&bytes))
                }
                Attribute::ExpiryTime(seconds) => {
                    let payload = vec![
                        u5::try_from_u8(((seconds >> 5) & 0x1f) as u8).expect("5 bit group"),
                        u5::try_from_u8((seconds & 0x1f) as u8).expect("5 bit group"),
                    ];
                    (TAG_EXPIRY, payload)
                }
            };
            write_tagged_field(&mut data, tag, payload);
        }
        data
    }

    /// The digest the signature commits to: HRP bytes followed by the
    /// signatureless data packed to bytes.
    fn hash(&self) -> [u8; 32] {
        let signing_bytes = invoice_signing_bytes(&self.hrp_part(), &self.data_part());
        sha256::Hash::hash(&signing_bytes).to_byte_array()
    }

    /// Recovers the public key used for signing from the recoverable
    /// signature.
    pub fn recover_payee_pub_key(&self) -> Result<Pubkey, InvoiceError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(InvoiceError::InvalidSignature)?;
        let message = Message::from_digest(self.hash());
        secp256k1_instance()
            .recover_ecdsa(&message, &signature.0)
            .map(Pubkey::from)
            .map_err(|err| match err {
                secp256k1::Error::InvalidRecoveryId => InvoiceError::InvalidRecoveryId,
                _ => InvoiceError::InvalidSignature,
            })
    }

    /// Check that the signature verifies and recovers to the declared
    /// payee.
    pub fn check_signature(&self) -> Result<(), InvoiceError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(InvoiceError::InvalidSignature)?;
        let recovered = self.recover_payee_pub_key()?;
        if let Some(declared) = &self.node_id {
            if declared != &recovered {
                return Err(InvoiceError::InvalidSignature);
            }
        }
        let message = Message::from_digest(self.hash());
        secp256k1_instance()
            .verify_ecdsa(&message, &signature.0.to_standard(), &recovered.0)
            .map_err(|_| InvoiceError::InvalidSignature)
    }

    pub(crate) fn update_signature<F>(&mut self, sign_function: F) -> Result<(), InvoiceError>
    where
        F: FnOnce(&Message) -> RecoverableSignature,
    {
        let message = Message::from_digest(self.hash());
        self.signature = Some(InvoiceSignature(sign_function(&message)));
        let recovered = self.recover_payee_pub_key()?;
        match &self.node_id {
            Some(declared) if declared != &recovered => {
                return Err(InvoiceError::InvalidSignature)
            }
            _ => self.node_id = Some(recovered),
        }
        self.check_signature()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn payment_hash(&self) -> &Hash256 {
        &self.data.payment_hash
    }

    pub fn amount_msat(&self) -> Option<u64> {
        self.amount_msat
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_time().map_or(false, |expiry| {
            self.data.timestamp + expiry < now_timestamp_as_secs_u64()
        })
    }

    /// Structural invariants shared by the builder and the decoder.
    fn validate(&self) -> Result<(), InvoiceError> {
        if let Some(amount) = self.amount_msat {
            if amount == 0 || amount > MAX_AMOUNT_MSAT {
                return Err(InvoiceError::AmountOutOfRange);
            }
        }
        for (i, attr) in self.data.attrs.iter().enumerate() {
            for other in self.data.attrs.iter().skip(i + 1) {
                if std::mem::discriminant(attr) == std::mem::discriminant(other) {
                    return Err(InvoiceError::DuplicatedAttribute(format!("{:?}", attr)));
                }
            }
        }
        match (self.description(), self.description_hash()) {
            (Some(_), Some(_)) => return Err(InvoiceError::BothDescriptionAndHash),
            (None, None) => return Err(InvoiceError::NoDescription),
            _ => {}
        }
        if let Some(description) = self.description() {
            if description.len() > MAX_DESCRIPTION_LENGTH {
                return Err(InvoiceError::DescriptionTooLong(description.len()));
            }
        }
        if let Some(expiry) = self.expiry_time() {
            if *expiry > MAX_EXPIRY_SECS {
                return Err(InvoiceError::ExpiryOutOfRange);
            }
        }
        Ok(())
    }

    attr_getter!(description, Description, String);
    attr_getter!(description_hash, DescriptionHash, Hash256);
    attr_getter!(routing_hint, RoutingHint, Vec<RouteHintHop>);
    attr_getter!(expiry_time, ExpiryTime, u64);

    pub fn fallback_address(&self) -> Option<(u8, &[u8])> {
        self.data
            .attrs
            .iter()
            .filter_map(|attr| match attr {
                Attribute::FallbackAddr { version, hash } => Some((*version, hash.as_slice())),
                _ => None,
            })
            .next()
    }
}

/// Recoverable signature: r and s followed by the recovery id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvoiceSignature(pub RecoverableSignature);

impl PartialOrd for InvoiceSignature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InvoiceSignature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .serialize_compact()
            .1
            .cmp(&other.0.serialize_compact().1)
    }
}

impl InvoiceSignature {
    fn to_bytes(&self) -> [u8; 65] {
        let (recovery_id, signature) = self.0.serialize_compact();
        let mut bytes = [0u8; 65];
        bytes[0..64].copy_from_slice(&signature);
        bytes[64] = recovery_id.to_i32() as u8;
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, InvoiceError> {
        if bytes.len() != 65 {
            return Err(InvoiceError::InvalidSliceLength(
                "InvoiceSignature::from_bytes".into(),
            ));
        }
        let recovery_id =
            RecoveryId::from_i32(bytes[64] as i32).map_err(|_| InvoiceError::InvalidRecoveryId)?;
        RecoverableSignature::from_compact(&bytes[0..64], recovery_id)
            .map(InvoiceSignature)
            .map_err(|_| InvoiceError::InvalidSignature)
    }

    pub(crate) fn from_base32(signature: &[u5]) -> Result<Self, InvoiceError> {
        if signature.len() != SIGNATURE_U5_SIZE {
            return Err(InvoiceError::InvalidSliceLength(
                "InvoiceSignature::from_base32".into(),
            ));
        }
        // 104 groups are exactly 65 bytes, no padding involved.
        let bytes = Vec::<u8>::from_base32(signature).map_err(InvoiceError::Bech32Error)?;
        Self::from_bytes(&bytes)
    }
}

impl ToBase32 for InvoiceSignature {
    fn write_base32<W: WriteBase32>(&self, writer: &mut W) -> Result<(), <W as WriteBase32>::Err> {
        for group in bytes_to_u5(&self.to_bytes()) {
            writer.write_u5(group)?;
        }
        Ok(())
    }
}

impl Serialize for InvoiceSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(self.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InvoiceSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let signature_hex = String::deserialize(deserializer)?;
        let bytes = hex::decode(signature_hex).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl ToString for Bolt11Invoice {
    /// hrp: ln{currency}{amount}{multiplier}
    /// data: 7 groups of timestamp, tagged fields, 104 groups of signature
    fn to_string(&self) -> String {
        let hrp = self.hrp_part();
        let mut data = self.data_part();
        let signature = self.signature.as_ref().expect("invoice signed");
        signature
            .write_base32(&mut data)
            .expect("Vec<u5> is infallible");
        encode(&hrp, data, Variant::Bech32).expect("encode invoice using bech32")
    }
}

impl FromStr for Bolt11Invoice {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, data, variant) = bech32::decode(s).map_err(InvoiceError::Bech32Error)?;
        if variant != Variant::Bech32 {
            return Err(InvoiceError::Bech32Error(bech32::Error::InvalidChecksum));
        }
        let (currency, amount_msat) = parse_hrp(&hrp)?;
        if data.len() < TIMESTAMP_U5_SIZE + SIGNATURE_U5_SIZE {
            return Err(InvoiceError::TooShortDataPart);
        }
        let timestamp = data[..TIMESTAMP_U5_SIZE]
            .iter()
            .fold(0u64, |acc, group| (acc << 5) | group.to_u8() as u64);
        let tagged = &data[TIMESTAMP_U5_SIZE..data.len() - SIGNATURE_U5_SIZE];
        let signature = InvoiceSignature::from_base32(&data[data.len() - SIGNATURE_U5_SIZE..])?;
        let (payment_hash, attrs) = parse_tagged_fields(tagged)?;

        let mut invoice = Bolt11Invoice {
            currency,
            amount_msat,
            node_id: None,
            signature: Some(signature),
            data: InvoiceData {
                timestamp,
                payment_hash,
                attrs,
            },
        };
        invoice.node_id = Some(invoice.recover_payee_pub_key()?);
        invoice.check_signature()?;
        invoice.validate()?;
        Ok(invoice)
    }
}

fn write_tagged_field(data: &mut Vec<u5>, tag: u8, payload: Vec<u5>) {
    debug_assert!(payload.len() < 1024);
    data.push(u5::try_from_u8(tag).expect("tag is a 5 bit value"));
    data.push(u5::try_from_u8((payload.len() / 32) as u8).expect("length fits 10 bits"));
    data.push(u5::try_from_u8((payload.len() % 32) as u8).expect("5 bit remainder"));
    data.extend(payload);
}

fn parse_hrp(hrp: &str) -> Result<(Currency, Option<u64>), InvoiceError> {
    let (_, (currency, amount, si)) =
        all_consuming(nom_scan_hrp)(hrp).map_err(|_| InvoiceError::MalformedHRP)?;
    let currency = Currency::from_str(currency)?;
    let amount_msat = decode_amount_part(amount, si)?;
    Ok((currency, amount_msat))
}

/// The shortest exact representation: the largest unit dividing the
/// amount, falling back to tenth-msat pico units.
fn encode_amount_part(msat: u64) -> String {
    if msat % MSAT_PER_MILLI == 0 {
        format!("{}m", msat / MSAT_PER_MILLI)
    } else if msat % MSAT_PER_MICRO == 0 {
        format!("{}u", msat / MSAT_PER_MICRO)
    } else if msat % MSAT_PER_NANO == 0 {
        format!("{}n", msat / MSAT_PER_NANO)
    } else {
        format!("{}p", msat * 10)
    }
}

fn decode_amount_part(
    amount: Option<&str>,
    si: Option<&str>,
) -> Result<Option<u64>, InvoiceError> {
    let Some(amount) = amount else {
        return if si.is_some() {
            Err(InvoiceError::MalformedHRP)
        } else {
            Ok(None)
        };
    };
    let value: u64 = amount.parse().map_err(|_| InvoiceError::ParseAmountError)?;
    let msat = match si {
        None => value
            .checked_mul(MSAT_PER_BTC)
            .ok_or(InvoiceError::AmountOutOfRange)?,
        Some("m") => value
            .checked_mul(MSAT_PER_MILLI)
            .ok_or(InvoiceError::AmountOutOfRange)?,
        Some("u") => value
            .checked_mul(MSAT_PER_MICRO)
            .ok_or(InvoiceError::AmountOutOfRange)?,
        Some("n") => value
            .checked_mul(MSAT_PER_NANO)
            .ok_or(InvoiceError::AmountOutOfRange)?,
        Some("p") => {
            if value % 10 != 0 {
                return Err(InvoiceError::SubMsatPrecision);
            }
            value / 10
        }
        Some(_) => return Err(InvoiceError::UnknownSiPrefix),
    };
    if msat == 0 || msat > MAX_AMOUNT_MSAT {
        return Err(InvoiceError::AmountOutOfRange);
    }
    Ok(Some(msat))
}

fn hash_from_payload(payload: &[u5], what: &str) -> Result<Hash256, InvoiceError> {
    let bytes = Vec::<u8>::from_base32(payload).map_err(InvoiceError::Bech32Error)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| InvoiceError::InvalidSliceLength(what.to_string()))?;
    Ok(Hash256::from(bytes))
}

fn parse_tagged_fields(mut data: &[u5]) -> Result<(Hash256, Vec<Attribute>), InvoiceError> {
    let mut payment_hash = None;
    let mut attrs = Vec::new();
    while !data.is_empty() {
        if data.len() < 3 {
            return Err(InvoiceError::UnexpectedEndOfTaggedFields);
        }
        let tag = data[0].to_u8();
        let length = data[1].to_u8() as usize * 32 + data[2].to_u8() as usize;
        if data.len() < 3 + length {
            return Err(InvoiceError::UnexpectedEndOfTaggedFields);
        }
        let payload = &data[3..3 + length];
        data = &data[3 + length..];
        match tag {
            TAG_PAYMENT_HASH => {
                if payment_hash.is_some() {
                    return Err(InvoiceError::DuplicatedAttribute("payment hash".into()));
                }
                payment_hash = Some(hash_from_payload(payload, "payment hash")?);
            }
            TAG_DESCRIPTION => {
                let bytes = Vec::<u8>::from_base32(payload).map_err(InvoiceError::Bech32Error)?;
                let description =
                    String::from_utf8(bytes).map_err(|_| InvoiceError::InvalidUtf8)?;
                attrs.push(Attribute::Description(description));
            }
            TAG_DESCRIPTION_HASH => {
                attrs.push(Attribute::DescriptionHash(hash_from_payload(
                    payload,
                    "description hash",
                )?));
            }
            TAG_FALLBACK_ADDR => {
                let bytes = Vec::<u8>::from_base32(payload).map_err(InvoiceError::Bech32Error)?;
                let (version, hash) = bytes
                    .split_first()
                    .ok_or_else(|| InvoiceError::InvalidSliceLength("fallback address".into()))?;
                attrs.push(Attribute::FallbackAddr {
                    version: *version,
                    hash: hash.to_vec(),
                });
            }
            TAG_ROUTING_HINT => {
                let bytes = Vec::<u8>::from_base32(payload).map_err(InvoiceError::Bech32Error)?;
                if bytes.is_empty() || bytes.len() % RouteHintHop::ENCODED_LENGTH != 0 {
                    return Err(InvoiceError::InvalidSliceLength("routing hint".into()));
                }
                let hops = bytes
                    .chunks(RouteHintHop::ENCODED_LENGTH)
                    .map(RouteHintHop::from_slice)
                    .collect::<Result<Vec<_>, _>>()?;
                attrs.push(Attribute::RoutingHint(hops));
            }
            TAG_EXPIRY => {
                if payload.len() != 2 {
                    return Err(InvoiceError::InvalidSliceLength("expiry".into()));
                }
                let seconds = (payload[0].to_u8() as u64) << 5 | payload[1].to_u8() as u64;
                attrs.push(Attribute::ExpiryTime(seconds));
            }
            unknown => {
                // Readers must skip over unknown tagged fields.
                trace!("Skipping unknown invoice tag {}", unknown);
            }
        }
    }
    let payment_hash = payment_hash.ok_or(InvoiceError::NoPaymentHash)?;
    Ok((payment_hash, attrs))
}

pub struct InvoiceBuilder {
    currency: Currency,
    amount_msat: Option<u64>,
    timestamp: Option<u64>,
    payment_hash: Option<Hash256>,
    payment_preimage: Option<Hash256>,
    attrs: Vec<Attribute>,
}

impl Default for InvoiceBuilder {
    fn default() -> Self {
        Self::new(Currency::Bitcoin)
    }
}

macro_rules! attr_setter {
    ($name:ident, $attr:ident, $param:ty) => {
        pub fn $name(self, value: $param) -> Self {
            self.add_attr(Attribute::$attr(value))
        }
    };
}

impl InvoiceBuilder {
    pub fn new(currency: Currency) -> Self {
        Self {
            currency,
            amount_msat: None,
            timestamp: None,
            payment_hash: None,
            payment_preimage: None,
            attrs: Vec::new(),
        }
    }

    pub fn amount_msat(mut self, amount_msat: Option<u64>) -> Self {
        self.amount_msat = amount_msat;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payment_hash(mut self, payment_hash: Hash256) -> Self {
        self.payment_hash = Some(payment_hash);
        self
    }

    /// Derive the payment hash by hashing a preimage.
    pub fn payment_preimage(mut self, payment_preimage: Hash256) -> Self {
        self.payment_preimage = Some(payment_preimage);
        self
    }

    pub fn add_attr(mut self, attr: Attribute) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn fallback_address(self, version: u8, hash: Vec<u8>) -> Self {
        self.add_attr(Attribute::FallbackAddr { version, hash })
    }

    attr_setter!(description, Description, String);
    attr_setter!(description_hash, DescriptionHash, Hash256);
    attr_setter!(route_hint, RoutingHint, Vec<RouteHintHop>);
    attr_setter!(expiry_time, ExpiryTime, u64);

    pub fn build(self) -> Result<Bolt11Invoice, InvoiceError> {
        let payment_hash = match (self.payment_hash, self.payment_preimage) {
            (Some(_), Some(_)) => return Err(InvoiceError::BothPaymenthashAndPreimage),
            (Some(payment_hash), None) => payment_hash,
            (None, Some(preimage)) => {
                Hash256::from(sha256::Hash::hash(preimage.as_ref()).to_byte_array())
            }
            (None, None) => return Err(InvoiceError::NoPaymentHash),
        };
        let invoice = Bolt11Invoice {
            currency: self.currency,
            amount_msat: self.amount_msat,
            node_id: None,
            signature: None,
            data: InvoiceData {
                timestamp: self.timestamp.unwrap_or_else(now_timestamp_as_secs_u64),
                payment_hash,
                attrs: self.attrs,
            },
        };
        invoice.validate()?;
        Ok(invoice)
    }

    pub fn build_with_sign<F>(self, sign_function: F) -> Result<Bolt11Invoice, InvoiceError>
    where
        F: FnOnce(&Message) -> RecoverableSignature,
    {
        let mut invoice = self.build()?;
        invoice.update_signature(sign_function)?;
        Ok(invoice)
    }
}
