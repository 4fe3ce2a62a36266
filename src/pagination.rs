//! Opaque continuation tokens.
//!
//! Tokens are JSON-encoded resume positions. Callers must treat them as opaque bytes;
//! anything that does not decode back into the expected position is rejected as an
//! invalid request.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::providers::PersistenceError;

pub fn encode_page_token<T: Serialize>(position: &T) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(position).map_err(|e| PersistenceError::invalid(format!("page token not encodable: {e}")))
}

/// `None` and an empty token both mean "first page".
pub fn decode_page_token<T: DeserializeOwned>(token: Option<&[u8]>) -> Result<Option<T>, PersistenceError> {
    match token {
        None => Ok(None),
        Some(bytes) if bytes.is_empty() => Ok(None),
        Some(bytes) => serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| PersistenceError::invalid(format!("invalid page token: {e}"))),
    }
}

/// Split off a page of `page_size` items, returning the token that resumes after it.
///
/// `rows` must hold at most `page_size + 1` items; the extra row only signals that
/// another page exists.
pub(crate) fn paginate<T, P: Serialize>(
    mut rows: Vec<T>,
    page_size: usize,
    position: impl Fn(&T) -> P,
) -> Result<(Vec<T>, Option<Vec<u8>>), PersistenceError> {
    if rows.len() <= page_size {
        return Ok((rows, None));
    }
    rows.truncate(page_size);
    let token = match rows.last() {
        Some(last) => Some(encode_page_token(&position(last))?),
        None => None,
    };
    Ok((rows, token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_first_page() {
        assert_eq!(decode_page_token::<i64>(None).unwrap(), None);
        assert_eq!(decode_page_token::<i64>(Some(&[])).unwrap(), None);
        let token = encode_page_token(&17i64).unwrap();
        assert_eq!(decode_page_token::<i64>(Some(&token)).unwrap(), Some(17));
    }

    #[test]
    fn garbage_token_is_invalid_request() {
        assert!(matches!(
            decode_page_token::<i64>(Some(b"{oops")),
            Err(PersistenceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn paginate_only_emits_token_when_more_rows_exist() {
        let (page, token) = paginate(vec![1, 2, 3], 3, |v| *v).unwrap();
        assert_eq!(page, vec![1, 2, 3]);
        assert!(token.is_none());

        let (page, token) = paginate(vec![1, 2, 3, 4], 3, |v| *v).unwrap();
        assert_eq!(page, vec![1, 2, 3]);
        assert_eq!(decode_page_token::<i32>(token.as_deref()).unwrap(), Some(3));
    }
}
