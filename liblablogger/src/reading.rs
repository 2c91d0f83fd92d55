use fxhash::FxHashMap;

use super::error::ReadingError;

/// Commands ending in this suffix get a `<tag>,` prefix in front of the value
pub const RAW_SUFFIX: &str = "#raw";

/// Parse one finite decimal value. Trailing units such as `mbar` or `C` are ignored.
pub fn parse_reading(reply: &str) -> Result<f64, ReadingError> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ReadingError::Empty);
    }
    let number = reply.split_whitespace().next().unwrap_or(reply);
    let value = match number.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            // units glued to the number, e.g. "23.5C"
            let end = number
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_ascii_digit() || *c == '.')
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            number[..end]
                .parse::<f64>()
                .map_err(|_| ReadingError::NotANumber(reply.to_string()))?
        }
    };
    // "nan" and "inf" parse as floats but are not readings
    if !value.is_finite() {
        return Err(ReadingError::NotANumber(reply.to_string()));
    }
    Ok(value)
}

/// Strip the `<tag>,` prefix of replies to `#raw` commands
pub fn strip_raw_prefix<'a>(command: &str, reply: &'a str) -> &'a str {
    if !command.trim_end().ends_with(RAW_SUFFIX) {
        return reply;
    }
    match reply.split_once(',') {
        Some((_, rest)) => rest,
        None => reply,
    }
}

/// A compound reply split into the positions that parsed and the fields that did not
#[derive(Debug, Default, PartialEq)]
pub struct CompoundReply {
    pub values: FxHashMap<usize, f64>,
    pub rejected: Vec<ReadingError>,
}

fn parse_field(field: &str) -> Result<(usize, f64), ReadingError> {
    let (position, value) = field
        .split_once(':')
        .ok_or_else(|| ReadingError::BadField(field.to_string()))?;
    let position = position
        .trim()
        .parse::<usize>()
        .map_err(|_| ReadingError::BadField(field.to_string()))?;
    Ok((position, parse_reading(value)?))
}

/// Parse a compound reply `<pos>:<value>,<pos>:<value>,...`.
/// A bad field only costs its own position; an empty reply is an error.
pub fn parse_compound(reply: &str) -> Result<CompoundReply, ReadingError> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ReadingError::Empty);
    }
    let mut parsed = CompoundReply::default();
    for field in reply.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        match parse_field(field) {
            Ok((position, value)) => {
                parsed.values.insert(position, value);
            }
            Err(e) => parsed.rejected.push(e),
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain() {
        assert_eq!(parse_reading("1.5e-9"), Ok(1.5e-9));
        assert_eq!(parse_reading("  42\r\n"), Ok(42.0));
    }

    #[test]
    fn test_units() {
        assert_eq!(parse_reading("3.2e-6 mbar"), Ok(3.2e-6));
        assert_eq!(parse_reading("23.5C"), Ok(23.5));
    }

    #[test]
    fn test_failures() {
        assert_eq!(parse_reading(""), Err(ReadingError::Empty));
        assert!(matches!(
            parse_reading("OLD_DATA"),
            Err(ReadingError::NotANumber(_))
        ));
    }

    #[test]
    fn test_non_finite() {
        for reply in ["nan", "NaN", "inf", "-inf", "infinity", "inf mbar"] {
            assert!(
                matches!(parse_reading(reply), Err(ReadingError::NotANumber(_))),
                "{reply} was accepted"
            );
        }
    }

    #[test]
    fn test_raw_prefix() {
        assert_eq!(strip_raw_prefix("read_pressure#raw", "1692,3.1e-7"), "3.1e-7");
        assert_eq!(strip_raw_prefix("read_pressure", "1692,3.1e-7"), "1692,3.1e-7");
    }

    #[test]
    fn test_compound() {
        let parsed = parse_compound("0:1.5,1:2.5, 3:-4").unwrap();
        assert_eq!(parsed.values.len(), 3);
        assert_eq!(parsed.values[&0], 1.5);
        assert_eq!(parsed.values[&3], -4.0);
        assert!(!parsed.values.contains_key(&2));
        assert!(parsed.rejected.is_empty());
        assert_eq!(parse_compound("  "), Err(ReadingError::Empty));
    }

    #[test]
    fn test_compound_bad_fields() {
        let parsed = parse_compound("0:1.1,4:ERR,garbage,6:2.2,7:nan").unwrap();
        assert_eq!(parsed.values.len(), 2);
        assert_eq!(parsed.values[&0], 1.1);
        assert_eq!(parsed.values[&6], 2.2);
        assert_eq!(parsed.rejected.len(), 3);
        assert!(matches!(parsed.rejected[0], ReadingError::NotANumber(_)));
        assert!(matches!(parsed.rejected[1], ReadingError::BadField(_)));
    }
}
