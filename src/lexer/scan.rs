//! Pluggable accelerated scanning
//!
//! A [`FastScanner`] may stand in for the reference lexer. It either returns a
//! token sequence structurally equal to what [`tokenize`](super::tokenize)
//! would produce, or declines with `None`; the caller then falls back to the
//! reference lexer. With `verify` set, every fast result is checked against
//! the reference output and discarded on mismatch.

use tracing::{debug, warn};

use super::{tokenize, LexError, Token};

pub trait FastScanner: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Scan `source`, or return `None` for inputs this scanner cannot handle.
    fn scan(&self, source: &str) -> Option<Vec<Token>>;
}

/// Tokenize through `scanner` when one is supplied, falling back to the
/// reference lexer.
pub fn tokenize_with(
    source: &str,
    scanner: Option<&dyn FastScanner>,
    verify: bool,
) -> Result<Vec<Token>, LexError> {
    let Some(scanner) = scanner else {
        return tokenize(source);
    };

    let Some(fast) = scanner.scan(source) else {
        debug!(scanner = scanner.name(), "fast scan declined, using reference lexer");
        return tokenize(source);
    };

    if !verify {
        return Ok(fast);
    }

    let reference = tokenize(source)?;
    if reference == fast {
        Ok(fast)
    } else {
        warn!(
            scanner = scanner.name(),
            "fast scan diverged from reference lexer; discarding fast result"
        );
        Ok(reference)
    }
}
