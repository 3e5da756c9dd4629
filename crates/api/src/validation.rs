use std::str::FromStr;

use validator::Validate;

use crate::error::ApiError;

pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))
}

/// Parses a comma-separated query value, ignoring blank segments.
pub fn parse_list<T>(field: &str, raw: Option<&str>) -> Result<Vec<T>, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .parse::<T>()
                .map_err(|err| ApiError::Validation(format!("{field}: {segment}: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn parse_list_skips_blanks_and_reports_bad_segments() {
        let id = Uuid::new_v4();
        let raw = format!(" {id}, ,");
        let ids: Vec<Uuid> = parse_list("dao_ids", Some(&raw)).expect("parsed");
        assert_eq!(ids, vec![id]);

        let err = parse_list::<Uuid>("dao_ids", Some("nope")).expect_err("invalid");
        assert!(err.to_string().contains("dao_ids: nope"));

        assert!(parse_list::<Uuid>("dao_ids", None).expect("empty").is_empty());
    }
}
