use crate::error::{HexTypeError, SyncError};

/// At most this many partitions can be mirrored next to the protective entry.
pub const MAX_SELECTIONS: usize = 3;

/// A user-chosen GPT partition to mirror into the hybrid MBR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSelection {
    /// 1-based GPT partition number.
    pub number: usize,
    pub active: bool,
    /// Forced MBR type byte. A `00` override counts as none.
    pub type_override: Option<u8>,
}

impl PartitionSelection {
    /// 0-based index into the GPT entry list.
    pub fn gpt_index(&self) -> Option<usize> {
        self.number.checked_sub(1)
    }
}

/// Parse a byte written as one or two hex digits.
pub fn parse_hex_type(text: &str) -> Result<u8, HexTypeError> {
    if text.is_empty() {
        return Err(HexTypeError::Empty);
    }
    if text.chars().count() > 2 {
        return Err(HexTypeError::TooLong);
    }
    text.chars().try_fold(0u8, |value, c| {
        let digit = c.to_digit(16).ok_or(HexTypeError::IllegalDigit(c))?;
        Ok(value * 16 + digit as u8)
    })
}

/// Parse one `<n>`, `<n>+`, `<n>-<hex>` or `<n>+<hex>` token.
pub fn parse_selection(token: &str, gpt_count: usize) -> Result<PartitionSelection, SyncError> {
    // '+' wins over '-' when both are present, so "2+-" is active with type "-".
    let split = token.find('+').or_else(|| token.find('-'));
    let (number_text, sign, hex) = match split {
        Some(pos) => (&token[..pos], token[pos..].chars().next(), &token[pos + 1..]),
        None => (token, None, ""),
    };

    let number = number_text
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=gpt_count).contains(n))
        .ok_or_else(|| SyncError::PartitionOutOfRange {
            token: number_text.to_string(),
            max: gpt_count,
        })?;

    let type_override = if hex.is_empty() {
        None
    } else {
        let value = parse_hex_type(hex).map_err(|reason| SyncError::InvalidHexType {
            text: hex.to_string(),
            reason,
        })?;
        Some(value).filter(|&t| t != 0)
    };

    Ok(PartitionSelection {
        number,
        active: sign == Some('+'),
        type_override,
    })
}

/// Parse the partition tokens given on the command line. Fails before any
/// table is built if there are too many tokens, a token is malformed or more
/// than one partition is marked active.
pub fn parse_selections<S: AsRef<str>>(
    tokens: &[S],
    gpt_count: usize,
) -> Result<Vec<PartitionSelection>, SyncError> {
    if tokens.len() > MAX_SELECTIONS {
        return Err(SyncError::TooManySelections {
            count: tokens.len(),
        });
    }

    let mut selections = Vec::with_capacity(tokens.len());
    for token in tokens {
        let selection = parse_selection(token.as_ref(), gpt_count)?;
        if selection.active && selections.iter().any(|s: &PartitionSelection| s.active) {
            return Err(SyncError::MultipleActive);
        }
        selections.push(selection);
    }
    Ok(selections)
}
