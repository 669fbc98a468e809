//! Car-rental eligibility checks run before a rental lead is sent.

use chrono::{Datelike, NaiveDate};

use super::form::FormData;
use crate::error::{Error, Result};

const PREMIUM_MIN_AGE: u32 = 21;
const DEFAULT_MIN_AGE: u32 = 18;
const PREMIUM_CARS: [&str; 2] = ["Audi Q7", "Range Rover Sport"];

pub const REQUIRED_FIELDS: [&str; 8] = [
    "firstName",
    "lastName",
    "phone",
    "email",
    "dob",
    "car",
    "startDate",
    "endDate",
];

pub fn min_age_for_car(car: &str) -> u32 {
    if PREMIUM_CARS.contains(&car.trim()) {
        PREMIUM_MIN_AGE
    } else {
        DEFAULT_MIN_AGE
    }
}

/// Too young when born after `today` minus `min_age` years.
///
/// An unparsable date of birth counts as too young.
pub fn is_under_min_age(dob: &str, min_age: u32, today: NaiveDate) -> bool {
    let Some(dob) = parse_date(dob) else {
        return true;
    };
    let Some(threshold) = years_before(today, min_age) else {
        return true;
    };
    dob > threshold
}

/// Required fields, start date not in the past, minimum age for the car.
pub fn check(form: &FormData, today: NaiveDate) -> Result<()> {
    if let Some(missing) = REQUIRED_FIELDS
        .iter()
        .find(|field| form.get(&[**field]).is_empty())
    {
        return Err(Error::InvalidInput(format!("missing field: {missing}")));
    }

    let start = form.get(&["startDate"]);
    match parse_date(&start) {
        Some(start) if start >= today => {}
        Some(_) => {
            return Err(Error::InvalidInput(
                "rental start date lies in the past".to_string(),
            ))
        }
        None => {
            return Err(Error::InvalidInput(format!(
                "invalid rental start date: {start}"
            )))
        }
    }

    let car = form.get(&["car"]);
    let min_age = min_age_for_car(&car);
    if is_under_min_age(&form.get(&["dob"]), min_age, today) {
        return Err(Error::InvalidInput(format!(
            "minimum driver age for {car} is {min_age}"
        )));
    }
    Ok(())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Same calendar day `years` earlier; 29 February falls back to the 28th.
fn years_before(date: NaiveDate, years: u32) -> Option<NaiveDate> {
    let year = date.year() - i32::try_from(years).ok()?;
    date.with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, date.month(), 28))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn rental_form(car: &str, dob: &str, start: &str) -> FormData {
        FormData::new()
            .with("firstName", "Lina")
            .with("lastName", "Haddad")
            .with("phone", "123")
            .with("email", "a@b.com")
            .with("dob", dob)
            .with("car", car)
            .with("startDate", start)
            .with("endDate", "2026-11-02")
    }

    #[test]
    fn premium_cars_need_21() {
        assert_eq!(min_age_for_car("Audi Q7"), 21);
        assert_eq!(min_age_for_car(" Range Rover Sport "), 21);
        assert_eq!(min_age_for_car("VW Golf"), 18);
        assert_eq!(min_age_for_car(""), 18);
    }

    #[test]
    fn birthday_today_is_old_enough() {
        assert!(!is_under_min_age("2005-10-16", 21, today()));
        assert!(is_under_min_age("2005-10-17", 21, today()));
        assert!(is_under_min_age("not-a-date", 18, today()));
    }

    #[test]
    fn check_accepts_valid_rental() {
        let form = rental_form("Audi Q7", "1990-01-01", "2026-10-20");
        assert!(check(&form, today()).is_ok());
    }

    #[test]
    fn check_rejects_young_driver_for_premium_car() {
        let form = rental_form("Range Rover Sport", "2006-01-01", "2026-10-20");
        let error = check(&form, today()).unwrap_err();
        assert!(error.to_string().contains("minimum driver age"));

        let form = rental_form("VW Golf", "2006-01-01", "2026-10-20");
        assert!(check(&form, today()).is_ok());
    }

    #[test]
    fn check_rejects_past_start_and_missing_fields() {
        let form = rental_form("VW Golf", "1990-01-01", "2026-10-15");
        assert!(check(&form, today()).is_err());

        let form = FormData::new().with("firstName", "Lina");
        let error = check(&form, today()).unwrap_err();
        assert!(error.to_string().contains("lastName"));
    }
}
