use aliri_braid::braid;
use std::fmt;

/// Implements redacted `Debug` and `Display` for a secret-bearing borrowed braid
///
/// Plain formatting prints only a placeholder naming the secret. The alternate
/// flag reveals it: `{:#}` writes the whole value, while `{:#?}` writes a quoted
/// prefix of `$prefix` characters, or of the requested width when one is given.
macro_rules! redacted {
    ($ty:ty, $name:literal, $prefix:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    let shown = f.width().unwrap_or($prefix);
                    write!(f, "\"{}\"", Prefix(&self.0, shown))
                } else {
                    f.write_str(concat!("<", $name, " redacted>"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str(&self.0)
                } else {
                    f.write_str(concat!("<", $name, " redacted>"))
                }
            }
        }
    };
}

/// The first `.1` characters of a secret, with an ellipsis marking truncation
struct Prefix<'a>(&'a str, usize);

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Self(secret, shown) = *self;
        match secret.char_indices().nth(shown) {
            Some((end, _)) => {
                f.write_str(&secret[..end])?;
                f.write_str("…")
            }
            None => f.write_str(secret),
        }
    }
}

/// A device identifier, as registered with the hub
#[braid(serde)]
pub struct DeviceId;

/// A module identifier, scoped to a device
#[braid(serde)]
pub struct ModuleId;

/// A Base64-encoded symmetric key of a device or module identity
#[braid(serde, debug = "owned", display = "owned")]
pub struct SharedAccessKey;

redacted!(SharedAccessKeyRef, "shared access key", 4);

/// A token signature in its wire form, Base64-encoded and then URL-encoded
#[braid(serde, debug = "owned", display = "owned")]
pub struct Signature;

redacted!(SignatureRef, "signature", 6);
