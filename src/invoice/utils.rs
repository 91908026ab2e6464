use bech32::u5;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::bytes::streaming::tag;
use nom::combinator::opt;
use nom::IResult;

/// Spread bytes over 5-bit groups, most significant bits first. A final
/// partial group is right-padded with zero bits.
pub(crate) fn bytes_to_u5(bytes: &[u8]) -> Vec<u5> {
    let mut groups = Vec::with_capacity((bytes.len() * 8 + 4) / 5);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for byte in bytes {
        buffer = (buffer << 8) | *byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            groups.push(u5::try_from_u8(((buffer >> bits) & 0x1f) as u8).expect("5 bit group"));
        }
    }
    if bits > 0 {
        groups.push(u5::try_from_u8(((buffer << (5 - bits)) & 0x1f) as u8).expect("5 bit group"));
    }
    groups
}

/// Pack 5-bit groups back into bytes. Leftover bits that do not fill a
/// byte are emitted right-padded with zeros, matching `bytes_to_u5`.
pub(crate) fn u5_to_bytes_padded(groups: &[u5]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity((groups.len() * 5 + 7) / 8);
    let mut buffer = 0u32;
    let mut bits = 0u32;
    for group in groups {
        buffer = (buffer << 5) | group.to_u8() as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            bytes.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    if bits > 0 {
        bytes.push(((buffer << (8 - bits)) & 0xff) as u8);
    }
    bytes
}

/// The byte stream an invoice signature commits to: the HRP followed by
/// the signatureless data part packed to bytes.
pub(crate) fn invoice_signing_bytes(hrp: &str, data_without_signature: &[u5]) -> Vec<u8> {
    let mut preimage = hrp.as_bytes().to_vec();
    preimage.extend(u5_to_bytes_padded(data_without_signature));
    preimage
}

/// Split the HRP into currency, amount digits and multiplier letter.
pub(crate) fn nom_scan_hrp(input: &str) -> IResult<&str, (&str, Option<&str>, Option<&str>)> {
    let (input, _) = tag("ln")(input)?;
    let (input, currency) = alt((tag("bc"), tag("tb")))(input)?;
    let (input, amount) = opt(take_while1(|c: char| c.is_ascii_digit()))(input)?;
    let (input, si) = opt(take_while1(|c: char| ['m', 'u', 'n', 'p'].contains(&c)))(input)?;
    Ok((input, (currency, amount, si)))
}
