//! Embedded-payload handling for scraped quote pages.
//!
//! Quote pages carry their data in a bootstrap `<script>` as
//! `root.App.main = {...};`. Newer pages ship the store section as an
//! OpenSSL-style `Salted__` AES-256-CBC blob with the keying material
//! elsewhere in the same object; older pages ship it in the clear. Both
//! variants are live.

use crate::errors::{EtlError, Result};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::prelude::*;
use md5::{Digest, Md5};
use scraper::{Html, Selector};
use serde_json::Value;
use sha1::Sha1;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BOOTSTRAP_MARKER: &str = "root.App.main";
const SALT_HEADER: &[u8] = b"Salted__";

// ── Page extraction ───────────────────────────────────────────────────────────

/// Pull the bootstrap object out of a quote page.
pub fn extract_bootstrap_json(html: &str) -> Result<Value> {
    let doc = Html::parse_document(html);
    let script_sel = Selector::parse("script")
        .map_err(|e| EtlError::Payload(format!("script selector: {e:?}")))?;

    for script in doc.select(&script_sel) {
        let text: String = script.text().collect();
        if let Some(idx) = text.find(BOOTSTRAP_MARKER) {
            let json = balanced_object(&text[idx..])
                .ok_or_else(|| EtlError::Payload("unterminated bootstrap object".into()))?;
            return Ok(serde_json::from_str(json)?);
        }
    }

    Err(EtlError::Payload("no bootstrap script in page".into()))
}

/// Slice out the first balanced `{...}` object, string-aware.
fn balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;

    for (i, &b) in s.as_bytes()[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_str => escaped = true,
            b'"' => in_str = !in_str,
            b'{' if !in_str => depth += 1,
            b'}' if !in_str => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Store decoding ────────────────────────────────────────────────────────────

/// Resolve the store section of a bootstrap object: plaintext objects pass
/// through, base64 blobs are decrypted with keying material from the same
/// root object.
pub fn decode_stores(root: &Value) -> Result<Value> {
    let stores = root
        .pointer("/context/dispatcher/stores")
        .ok_or_else(|| EtlError::Payload("missing context.dispatcher.stores".into()))?;

    match stores {
        Value::Object(_) => Ok(stores.clone()),
        Value::String(blob) => decrypt_stores(blob, &derive_password(root)?),
        _ => Err(EtlError::Payload("unexpected stores shape".into())),
    }
}

/// Recover the decryption password from the bootstrap object. Either the
/// `_cs`/`_cr` pair (PBKDF2-derived) or a bare password under the one root
/// key that is neither `context` nor `plugins`.
fn derive_password(root: &Value) -> Result<String> {
    let cs = root.get("_cs").and_then(Value::as_str);
    let cr = root.get("_cr").and_then(Value::as_str);
    if let (Some(cs), Some(cr)) = (cs, cr) {
        let words: Value = serde_json::from_str(cr)?;
        let words = words
            .get("words")
            .and_then(Value::as_array)
            .ok_or_else(|| EtlError::Payload("_cr carries no words".into()))?;

        // The salt is the word list re-serialized as signed big-endian i32s.
        let mut salt = Vec::with_capacity(words.len() * 4);
        for word in words {
            let word = word
                .as_i64()
                .ok_or_else(|| EtlError::Payload("non-integer word in _cr".into()))?;
            salt.extend_from_slice(&(word as i32).to_be_bytes());
        }

        let mut derived = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha1>(cs.as_bytes(), &salt, 1, &mut derived);
        return Ok(hex::encode(derived));
    }

    root.as_object()
        .and_then(|obj| {
            obj.iter()
                .find(|(key, value)| *key != "context" && *key != "plugins" && value.is_string())
        })
        .and_then(|(_, value)| value.as_str())
        .map(str::to_owned)
        .ok_or_else(|| EtlError::Payload("no keying material in bootstrap object".into()))
}

/// Decrypt a `Salted__` base64 blob and parse the plaintext as JSON.
pub fn decrypt_stores(blob: &str, password: &str) -> Result<Value> {
    let raw = BASE64_STANDARD
        .decode(blob.trim())
        .map_err(|e| EtlError::Payload(format!("store blob is not base64: {e}")))?;

    if raw.len() < 16 || &raw[..8] != SALT_HEADER {
        return Err(EtlError::Payload("store blob lacks the Salted__ header".into()));
    }
    let salt = &raw[8..16];
    let ciphertext = &raw[16..];

    let (key, iv) = evp_bytes_to_key(password.as_bytes(), salt);
    let plaintext = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| EtlError::Payload(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EtlError::Payload("bad PKCS#7 padding".into()))?;

    let text = String::from_utf8(plaintext)
        .map_err(|_| EtlError::Payload("decrypted stores are not UTF-8".into()))?;
    Ok(serde_json::from_str(&text)?)
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration: hash
/// `prev ∥ password ∥ salt` until 48 bytes accumulate, then split into a
/// 32-byte key and a 16-byte IV.
fn evp_bytes_to_key(password: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 16]) {
    let mut key_iv = Vec::with_capacity(48);
    let mut block: Option<[u8; 16]> = None;

    while key_iv.len() < 48 {
        let mut hasher = Md5::new();
        if let Some(prev) = block {
            hasher.update(prev);
        }
        hasher.update(password);
        hasher.update(salt);
        let digest: [u8; 16] = hasher.finalize().into();
        key_iv.extend_from_slice(&digest);
        block = Some(digest);
    }

    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&key_iv[..32]);
    iv.copy_from_slice(&key_iv[32..48]);
    (key, iv)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
