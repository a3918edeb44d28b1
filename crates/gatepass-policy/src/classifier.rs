use chrono::{Datelike, NaiveDate};
use gatepass_core::IdentityRecord;

use crate::types::Eligibility;

/// Whole years between `birth_date` and `today`.
///
/// Calendar-year difference, minus one when today's month/day precedes the
/// birth month/day. A Feb 29 birthday therefore completes a year on Mar 1 in
/// non-leap years. Birth dates in the future count as age 0.
pub fn age_on(birth_date: NaiveDate, today: NaiveDate) -> u32 {
    if today < birth_date {
        return 0;
    }
    let mut years = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Derive the two facts the policy consumes from an identity record.
///
/// Pure: depends only on the record, the evaluation date and the adult age.
/// A record without a birth date is never adult.
pub fn classify(identity: &IdentityRecord, today: NaiveDate, adult_age: u32) -> Eligibility {
    let is_adult = identity
        .birth_date
        .map(|birth| age_on(birth, today) >= adult_age)
        .unwrap_or(false);

    Eligibility {
        is_adult,
        has_transport: identity.has_transport_eligibility,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_core::PersonRole;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn student(birth: Option<NaiveDate>, transport: bool) -> IdentityRecord {
        let mut record = IdentityRecord::new("Test", PersonRole::Student).with_transport(transport);
        record.birth_date = birth;
        record
    }

    #[test]
    fn test_exactly_eighteen_is_adult() {
        let record = student(Some(date(2006, 10, 18)), false);
        assert!(classify(&record, date(2024, 10, 18), 18).is_adult);
    }

    #[test]
    fn test_one_day_short_is_minor() {
        let record = student(Some(date(2006, 10, 18)), false);
        assert!(!classify(&record, date(2024, 10, 17), 18).is_adult);
    }

    #[test]
    fn test_year_rollover_boundary() {
        assert_eq!(age_on(date(2006, 12, 31), date(2024, 12, 30)), 17);
        assert_eq!(age_on(date(2006, 12, 31), date(2024, 12, 31)), 18);
        assert_eq!(age_on(date(2007, 1, 1), date(2024, 12, 31)), 17);
        assert_eq!(age_on(date(2007, 1, 1), date(2025, 1, 1)), 18);
    }

    #[test]
    fn test_leap_day_birthday_in_non_leap_year() {
        let birth = date(2008, 2, 29);
        assert_eq!(age_on(birth, date(2026, 2, 28)), 17);
        assert_eq!(age_on(birth, date(2026, 3, 1)), 18);
        assert!(!classify(&student(Some(birth), false), date(2026, 2, 28), 18).is_adult);
        assert!(classify(&student(Some(birth), false), date(2026, 3, 1), 18).is_adult);
    }

    #[test]
    fn test_leap_day_birthday_in_leap_year() {
        let birth = date(2012, 2, 29);
        assert_eq!(age_on(birth, date(2030, 2, 28)), 17);
        assert_eq!(age_on(birth, date(2032, 2, 29)), 20);
    }

    #[test]
    fn test_missing_birth_date_is_not_adult() {
        let eligibility = classify(&student(None, true), date(2024, 6, 1), 18);
        assert!(!eligibility.is_adult);
        assert!(eligibility.has_transport);
    }

    #[test]
    fn test_future_birth_date_is_age_zero() {
        assert_eq!(age_on(date(2030, 1, 1), date(2024, 1, 1)), 0);
    }

    #[test]
    fn test_transport_is_passthrough() {
        let today = date(2024, 6, 1);
        assert!(classify(&student(Some(date(2012, 6, 1)), true), today, 18).has_transport);
        assert!(!classify(&student(Some(date(2012, 6, 1)), false), today, 18).has_transport);
    }

    #[test]
    fn test_custom_adult_age() {
        let record = student(Some(date(2008, 6, 1)), false);
        assert!(classify(&record, date(2024, 6, 1), 16).is_adult);
        assert!(!classify(&record, date(2024, 6, 1), 18).is_adult);
    }
}
