use std::str::FromStr;

use secp256k1::SecretKey;

use crate::invoice::invoice_impl::{
    Attribute, Bolt11Invoice, Currency, InvoiceBuilder, RouteHintHop,
};
use crate::invoice::InvoiceError;
use crate::router::types::{secp256k1_instance, Hash256, Privkey, ShortChannelId};

fn test_key(fill: u8) -> Privkey {
    Privkey::from(SecretKey::from_slice(&[fill; 32]).expect("valid secret key"))
}

fn sign_with(key: &Privkey) -> impl FnOnce(&secp256k1::Message) -> secp256k1::ecdsa::RecoverableSignature + '_ {
    move |message| secp256k1_instance().sign_ecdsa_recoverable(message, &key.0)
}

fn payment_hash() -> Hash256 {
    let mut hash = [0u8; 32];
    hash[1] = 1;
    Hash256::from(hash)
}

#[test]
fn test_invoice_round_trip() {
    // 2500 micro-bitcoin, the "coffee" invoice.
    let key = test_key(0x52);
    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .amount_msat(Some(250_000_000))
        .payment_hash(payment_hash())
        .description("coffee".to_string())
        .timestamp(1_500_000_000)
        .build_with_sign(sign_with(&key))
        .expect("build invoice");

    let encoded = invoice.to_string();
    assert!(encoded.starts_with("lnbc2500u1"));

    let decoded = Bolt11Invoice::from_str(&encoded).expect("decode invoice");
    assert_eq!(decoded.currency, Currency::Bitcoin);
    assert_eq!(decoded.amount_msat(), Some(250_000_000));
    assert_eq!(decoded.data.timestamp, 1_500_000_000);
    assert_eq!(decoded.payment_hash(), &payment_hash());
    assert_eq!(decoded.description(), Some(&"coffee".to_string()));
    assert_eq!(decoded.node_id, Some(key.pubkey()));

    // encode(decode(encode(x))) == encode(x)
    assert_eq!(decoded.to_string(), encoded);
    assert_eq!(decoded, invoice);
}

#[test]
fn test_testnet_prefix() {
    let key = test_key(0x31);
    let invoice = InvoiceBuilder::new(Currency::BitcoinTestnet)
        .payment_hash(payment_hash())
        .description("testnet".to_string())
        .build_with_sign(sign_with(&key))
        .expect("build invoice");
    let encoded = invoice.to_string();
    assert!(encoded.starts_with("lntb1"));
    assert_eq!(
        Bolt11Invoice::from_str(&encoded).expect("decode").currency,
        Currency::BitcoinTestnet
    );
}

#[test]
fn test_amount_unit_selection() {
    let key = test_key(0x01);
    let cases = [
        (100_000_000u64, "lnbc1m1"),
        (250_000_000, "lnbc2500u1"),
        (100_000, "lnbc1u1"),
        (2_500, "lnbc25n1"),
        (1, "lnbc10p1"),
        (12_345, "lnbc123450p1"),
    ];
    for (amount_msat, prefix) in cases {
        let invoice = InvoiceBuilder::new(Currency::Bitcoin)
            .amount_msat(Some(amount_msat))
            .payment_hash(payment_hash())
            .description("x".to_string())
            .build_with_sign(sign_with(&key))
            .expect("build invoice");
        let encoded = invoice.to_string();
        assert!(
            encoded.starts_with(prefix),
            "expected {} to start with {}",
            encoded,
            prefix
        );
        let decoded = Bolt11Invoice::from_str(&encoded).expect("decode");
        assert_eq!(decoded.amount_msat(), Some(amount_msat));
    }
}

#[test]
fn test_amount_out_of_range() {
    let key = test_key(0x02);
    for amount_msat in [0u64, (1 << 32) + 1] {
        let result = InvoiceBuilder::new(Currency::Bitcoin)
            .amount_msat(Some(amount_msat))
            .payment_hash(payment_hash())
            .description("x".to_string())
            .build_with_sign(sign_with(&key));
        assert_eq!(result, Err(InvoiceError::AmountOutOfRange));
    }
    // The upper bound itself is payable.
    assert!(InvoiceBuilder::new(Currency::Bitcoin)
        .amount_msat(Some(1 << 32))
        .payment_hash(payment_hash())
        .description("x".to_string())
        .build_with_sign(sign_with(&key))
        .is_ok());
}

#[test]
fn test_amountless_invoice() {
    let key = test_key(0x03);
    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .description("donation".to_string())
        .build_with_sign(sign_with(&key))
        .expect("build invoice");
    let encoded = invoice.to_string();
    assert!(encoded.starts_with("lnbc1"));
    let decoded = Bolt11Invoice::from_str(&encoded).expect("decode");
    assert_eq!(decoded.amount_msat(), None);
}

#[test]
fn test_all_tagged_fields_round_trip() {
    let key = test_key(0x04);
    let hint = RouteHintHop {
        node_id: test_key(0x05).pubkey(),
        short_channel_id: ShortChannelId::new(600_000, 17, 1),
        fee_msat: 5000,
        cltv_expiry_delta: 40,
    };
    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .amount_msat(Some(100_000))
        .payment_hash(payment_hash())
        .description_hash(Hash256::from([7u8; 32]))
        .fallback_address(0, vec![0xab; 20])
        .route_hint(vec![hint.clone()])
        .expiry_time(3600 / 4)
        .timestamp(1_600_000_000)
        .build_with_sign(sign_with(&key))
        .expect("build invoice");

    let decoded = Bolt11Invoice::from_str(&invoice.to_string()).expect("decode");
    assert_eq!(decoded.description_hash(), Some(&Hash256::from([7u8; 32])));
    assert_eq!(decoded.fallback_address(), Some((0, &[0xab; 20][..])));
    assert_eq!(decoded.routing_hint(), Some(&vec![hint]));
    assert_eq!(decoded.expiry_time(), Some(&(3600 / 4)));
    assert_eq!(decoded.to_string(), invoice.to_string());
}

#[test]
fn test_description_and_hash_are_exclusive() {
    let key = test_key(0x06);
    let result = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .description("both".to_string())
        .description_hash(Hash256::from([1u8; 32]))
        .build_with_sign(sign_with(&key));
    assert_eq!(result, Err(InvoiceError::BothDescriptionAndHash));

    let result = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .build_with_sign(sign_with(&key));
    assert_eq!(result, Err(InvoiceError::NoDescription));
}

#[test]
fn test_payment_hash_is_mandatory() {
    let key = test_key(0x07);
    let result = InvoiceBuilder::new(Currency::Bitcoin)
        .description("no hash".to_string())
        .build_with_sign(sign_with(&key));
    assert_eq!(result, Err(InvoiceError::NoPaymentHash));
}

#[test]
fn test_payment_preimage_derives_hash() {
    let key = test_key(0x08);
    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_preimage(Hash256::from([9u8; 32]))
        .description("preimage".to_string())
        .build_with_sign(sign_with(&key))
        .expect("build invoice");
    // sha256 of the preimage, not the preimage itself.
    assert_ne!(invoice.payment_hash(), &Hash256::from([9u8; 32]));

    let result = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .payment_preimage(Hash256::from([9u8; 32]))
        .description("both".to_string())
        .build_with_sign(sign_with(&key));
    assert_eq!(result, Err(InvoiceError::BothPaymenthashAndPreimage));
}

#[test]
fn test_tampered_invoice_fails_signature_check() {
    let key = test_key(0x09);
    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .amount_msat(Some(100_000))
        .payment_hash(payment_hash())
        .description("tamper".to_string())
        .build_with_sign(sign_with(&key))
        .expect("build invoice");
    let encoded = invoice.to_string();

    // Flipping a data character breaks the checksum.
    let position = encoded.len() - 30;
    let mut chars: Vec<char> = encoded.chars().collect();
    chars[position] = if chars[position] == 'q' { 'p' } else { 'q' };
    let tampered: String = chars.into_iter().collect();
    assert!(Bolt11Invoice::from_str(&tampered).is_err());
}

#[test]
fn test_signature_recovers_the_signer() {
    let key = test_key(0x0a);
    let invoice = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .description("signer".to_string())
        .build_with_sign(sign_with(&key))
        .expect("build invoice");
    assert_eq!(invoice.node_id, Some(key.pubkey()));
    assert_eq!(
        invoice.recover_payee_pub_key().expect("recover"),
        key.pubkey()
    );
    assert!(invoice.check_signature().is_ok());
}

#[test]
fn test_expiry_bounds() {
    let key = test_key(0x0b);
    let result = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .description("expiry".to_string())
        .add_attr(Attribute::ExpiryTime(1024))
        .build_with_sign(sign_with(&key));
    assert_eq!(result, Err(InvoiceError::ExpiryOutOfRange));
}

#[test]
fn test_duplicate_attribute_rejected() {
    let key = test_key(0x0c);
    let result = InvoiceBuilder::new(Currency::Bitcoin)
        .payment_hash(payment_hash())
        .description("one".to_string())
        .description("two".to_string())
        .build_with_sign(sign_with(&key));
    assert!(matches!(result, Err(InvoiceError::DuplicatedAttribute(_))));
}

#[test]
fn test_garbage_is_rejected() {
    assert!(Bolt11Invoice::from_str("lnbc1notaninvoice").is_err());
    assert!(Bolt11Invoice::from_str("").is_err());
    // Valid bech32 but not an invoice.
    assert!(Bolt11Invoice::from_str("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").is_err());
}
