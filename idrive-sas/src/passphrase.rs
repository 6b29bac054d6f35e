// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Obfuscated PKCS#12 passphrases.
//!
//! Vendor apps ship their PKCS#12 keystore alongside a base64 token instead
//! of the plain passphrase. The token is a header record followed by one
//! 4-byte record per passphrase character, laid out like little-endian UTF-16
//! (the odd bytes of every record are zero). Each record is chained to the
//! previous character and to a character of the app's package name, so the
//! same token decodes only with the package name it was generated for.
//!
//! On iOS the token lives in the certificate's plist and the package name is
//! the bundle identifier from `Info.plist`.

use {
    crate::error::SasError,
    base64::{engine::general_purpose::STANDARD as STANDARD_ENGINE, Engine},
    log::debug,
    rand::Rng,
    zeroize::Zeroizing,
};

const RECORD_SIZE: usize = 4;
const CHAIN_CONSTANT: u8 = 0x17;

/// Widen a decoded byte the way a signed byte is widened to a UTF-16 unit.
fn widen(value: u8) -> char {
    char::from_u32(value as i8 as i16 as u16 as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn package_units(package_name: &str) -> Vec<u16> {
    package_name.encode_utf16().collect()
}

/// Derive the keystore passphrase from an obfuscation token and package name.
///
/// Whitespace inside `token` is ignored, so tokens copied out of wrapped
/// plist data can be passed as-is.
///
/// Fails if the token is malformed or if a record points outside of
/// `package_name`, which is how a mismatched package name manifests.
pub fn decode_passphrase(token: &str, package_name: &str) -> Result<String, SasError> {
    let token = token.split_whitespace().collect::<String>();
    let data = Zeroizing::new(STANDARD_ENGINE.decode(token)?);

    if data.len() < 5 {
        return Err(SasError::TokenTooShort(data.len()));
    }

    let name = package_units(package_name);
    let key = data[2];
    let mut current = data[0];
    let mut decoded = String::with_capacity(data.len() / RECORD_SIZE);

    for offset in (RECORD_SIZE..data.len() - 3).step_by(RECORD_SIZE) {
        if data[offset + 1] != 0 {
            return Err(SasError::TokenHighByte(offset + 1));
        }
        if data[offset + 3] != 0 {
            return Err(SasError::TokenHighByte(offset + 3));
        }

        let index = (current ^ key ^ data[offset]) as i8;
        if index < 0 || index as usize >= name.len() {
            return Err(SasError::TokenIndexOutOfBounds {
                index,
                offset,
                length: name.len(),
            });
        }

        current ^= data[offset + 2] ^ CHAIN_CONSTANT ^ name[index as usize] as u8;
        decoded.push(widen(current));
    }

    debug!(
        "decoded {} character passphrase from {} byte token",
        decoded.chars().count(),
        data.len()
    );

    Ok(decoded)
}

/// Produce a token that [decode_passphrase] turns back into `passphrase`.
///
/// The header byte, chaining key and the package name character used for
/// every record are drawn from `rng`. Only 7-bit passphrases can be
/// represented.
pub fn encode_passphrase<R: Rng + ?Sized>(
    passphrase: &str,
    package_name: &str,
    rng: &mut R,
) -> Result<String, SasError> {
    if passphrase.is_empty() {
        return Err(SasError::PassphraseUnencodable(
            "passphrase is empty".to_string(),
        ));
    }

    let name = package_units(package_name);
    // Indices are stored as signed bytes.
    let usable = name.len().min(i8::MAX as usize + 1);
    if usable == 0 {
        return Err(SasError::PackageNameUnusable(
            "package name is empty".to_string(),
        ));
    }

    let header: u8 = rng.gen();
    let key: u8 = rng.gen();

    let mut data = Zeroizing::new(Vec::with_capacity(
        RECORD_SIZE + passphrase.len() * RECORD_SIZE,
    ));
    data.extend_from_slice(&[header, 0, key, 0]);

    let mut current = header;
    for c in passphrase.chars() {
        if !c.is_ascii() {
            return Err(SasError::PassphraseUnencodable(format!(
                "non-ASCII character {c:?}"
            )));
        }
        let target = c as u8;
        let index = rng.gen_range(0..usable);

        data.extend_from_slice(&[
            current ^ key ^ index as u8,
            0,
            current ^ target ^ CHAIN_CONSTANT ^ name[index] as u8,
            0,
        ]);
        current = target;
    }

    Ok(STANDARD_ENGINE.encode(data.as_slice()))
}

#[cfg(test)]
mod test {
    use {super::*, crate::error::ErrorKind, rand::SeedableRng};

    const TOKEN: &str = concat!(
        "AAABAAsASgB+AF4AeQAmADEAJAAgAGoAaQByAGwAJAArAAcAUQAkAEcAEAA3AG8A",
        "JwAFAFoAVgBpAGIAZgBhAGYAbQBlAHoALABNAEQAMAA/ACYAbgBGAFQASABfAEAA",
        "RgAKADAAdAApAHAAOgBWAF8AfwB5AGkAcAAEAFAAYwBaAGAARgBFAGMAbwArAE0A",
        "OgBeAEcAAgA0ACIAKwBeAEAAYgA="
    );
    const PACKAGE_NAME: &str = "de.bmw.a4a.BMWAppKit";

    #[test]
    fn decode_reference_token() {
        let decoded = decode_passphrase(TOKEN, PACKAGE_NAME).unwrap();

        assert_eq!(decoded.chars().count(), 40);
        assert!(decoded.starts_with("sw6+xm:ZG"));
        assert_eq!(decoded, "sw6+xm:ZG%)Kzfuf%K-hXPF>-=Rwy^ZHj&1V3(O{");
    }

    #[test]
    fn decode_wrong_package_name() {
        let err = decode_passphrase(TOKEN, "de.bmw.a4a").unwrap_err();

        assert!(matches!(
            err,
            SasError::TokenIndexOutOfBounds {
                index: 10,
                offset: 4,
                length: 10
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn decode_is_deterministic() {
        assert_eq!(
            decode_passphrase(TOKEN, PACKAGE_NAME).unwrap(),
            decode_passphrase(TOKEN, PACKAGE_NAME).unwrap()
        );

        let a = decode_passphrase(TOKEN, "de.bmw").unwrap_err();
        let b = decode_passphrase(TOKEN, "de.bmw").unwrap_err();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn decode_ignores_line_wrapping() {
        let wrapped = TOKEN
            .as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");

        assert_eq!(
            decode_passphrase(&wrapped, PACKAGE_NAME).unwrap(),
            decode_passphrase(TOKEN, PACKAGE_NAME).unwrap()
        );
    }

    #[test]
    fn decode_malformed_tokens() {
        assert!(matches!(
            decode_passphrase("not base64!", PACKAGE_NAME),
            Err(SasError::TokenBase64(_))
        ));
        assert!(matches!(
            decode_passphrase("AAAAAA==", PACKAGE_NAME),
            Err(SasError::TokenTooShort(4))
        ));

        let high_byte = STANDARD_ENGINE.encode([0u8, 0, 0, 0, 0, 5, 0, 0]);
        assert!(matches!(
            decode_passphrase(&high_byte, PACKAGE_NAME),
            Err(SasError::TokenHighByte(5))
        ));

        let high_byte = STANDARD_ENGINE.encode([0u8, 0, 0, 0, 0, 0, 0, 9]);
        assert!(matches!(
            decode_passphrase(&high_byte, PACKAGE_NAME),
            Err(SasError::TokenHighByte(7))
        ));

        // Index 0x90 is a negative signed byte.
        let negative = STANDARD_ENGINE.encode([0u8, 0, 0, 0, 0x90, 0, 0, 0]);
        assert!(matches!(
            decode_passphrase(&negative, PACKAGE_NAME),
            Err(SasError::TokenIndexOutOfBounds { index: -112, .. })
        ));
    }

    #[test]
    fn decode_header_only_token() {
        // A header and a partial record contain no characters.
        let token = STANDARD_ENGINE.encode([0x41u8, 0, 0, 0, 0, 0, 0]);

        assert_eq!(decode_passphrase(&token, PACKAGE_NAME).unwrap(), "");
    }

    #[test]
    fn encode_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5a5);

        for passphrase in [
            "a",
            "sw6+xm:ZG%)Kzfuf%K-hXPF>-=Rwy^ZHj&1V3(O{",
            "with spaces and \"quotes\"",
        ] {
            for package_name in [PACKAGE_NAME, "de.bmw.connected.mobile20.row", "x"] {
                let token = encode_passphrase(passphrase, package_name, &mut rng).unwrap();
                let token_len = STANDARD_ENGINE.decode(&token).unwrap().len();

                let decoded = decode_passphrase(&token, package_name).unwrap();
                assert_eq!(decoded, passphrase);
                assert_eq!(decoded.chars().count(), (token_len - 4) / 4);
            }
        }
    }

    #[test]
    fn encode_rejects_unrepresentable_input() {
        let mut rng = rand::thread_rng();

        assert!(matches!(
            encode_passphrase("", PACKAGE_NAME, &mut rng),
            Err(SasError::PassphraseUnencodable(_))
        ));
        assert!(matches!(
            encode_passphrase("grüße", PACKAGE_NAME, &mut rng),
            Err(SasError::PassphraseUnencodable(_))
        ));
        assert!(matches!(
            encode_passphrase("secret", "", &mut rng),
            Err(SasError::PackageNameUnusable(_))
        ));
    }
}
