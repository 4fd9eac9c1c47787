use time::OffsetDateTime;
use time::macros::format_description;

/// Formats `at` as an archive stamp, e.g. `2024-03-09_14-05-59`.
pub fn format_stamp(at: OffsetDateTime) -> String {
    // Only numeric components, so formatting cannot fail.
    at.format(format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]"))
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Archive stamp for the current local time, or UTC when the offset is unknown.
pub fn archive_stamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_stamp(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn stamp_is_zero_padded() {
        assert_eq!(
            format_stamp(datetime!(2024-03-09 04:05:06 UTC)),
            "2024-03-09_04-05-06"
        );
    }

    #[test]
    fn current_stamp_has_expected_shape() {
        let stamp = archive_stamp();
        assert_eq!(stamp.len(), "2024-03-09_04-05-06".len());
        assert_eq!(&stamp[10..11], "_");
    }
}
