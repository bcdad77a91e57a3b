//! Step gate: may the user move forward from this step with this form?

use chrono::{Datelike, NaiveDate};

use super::form::{STRESS_DEFAULT, StepForm, birth_date_sentinel};
use super::step::Step;

pub const MIN_AGE_YEARS: i32 = 10;
pub const MAX_GOALS: usize = 3;
pub const PHONE_DIGITS: usize = 10;
pub const STRESS_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// Pure and total. A form that belongs to another step never passes.
pub fn can_advance(step: Step, form: &StepForm, today: NaiveDate) -> bool {
    match (step, form) {
        (Step::SignInChoice, StepForm::SignInChoice { choice }) => choice.is_some(),
        (Step::Name, StepForm::Name { name }) => !name.trim().is_empty(),
        (Step::BirthDate, StepForm::BirthDate { date }) => {
            *date != birth_date_sentinel() && old_enough(*date, today)
        }
        (Step::Goals, StepForm::Goals { selected }) => {
            let mut distinct = selected.clone();
            distinct.sort();
            distinct.dedup();
            !distinct.is_empty() && distinct.len() <= MAX_GOALS && distinct.len() == selected.len()
        }
        (Step::StressLevel, StepForm::StressLevel { level }) => {
            STRESS_RANGE.contains(level) && *level != STRESS_DEFAULT
        }
        (Step::SleepQuality, StepForm::SleepQuality { rating }) => rating.is_some(),
        (Step::Phone, StepForm::Phone { number }) => {
            number.len() == PHONE_DIGITS && number.bytes().all(|b| b.is_ascii_digit())
        }
        (Step::ScanIntro | Step::ScanResults, StepForm::Informational) => true,
        _ => false,
    }
}

/// At least `MIN_AGE_YEARS` calendar years before `today`.
fn old_enough(date: NaiveDate, today: NaiveDate) -> bool {
    let cutoff = today
        .with_year(today.year() - MIN_AGE_YEARS)
        // Feb 29 today with no Feb 29 ten years back
        .or_else(|| NaiveDate::from_ymd_opt(today.year() - MIN_AGE_YEARS, 2, 28));
    match cutoff {
        Some(cutoff) => date <= cutoff,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::form::EntryChoice;
    use crate::profile::{HealthGoal, SleepQuality};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn closed_at_defaults_for_input_steps() {
        for step in [
            Step::SignInChoice,
            Step::Name,
            Step::BirthDate,
            Step::Goals,
            Step::StressLevel,
            Step::SleepQuality,
            Step::Phone,
        ] {
            assert!(
                !can_advance(step, &StepForm::initial_for(step), today()),
                "{step} should be closed at its default"
            );
        }
    }

    #[test]
    fn sign_in_choice() {
        let form = StepForm::SignInChoice {
            choice: Some(EntryChoice::SignIn),
        };
        assert!(can_advance(Step::SignInChoice, &form, today()));
    }

    #[test]
    fn name_must_have_content() {
        let ok = StepForm::Name { name: "Ada".into() };
        let blank = StepForm::Name { name: "   ".into() };
        assert!(can_advance(Step::Name, &ok, today()));
        assert!(!can_advance(Step::Name, &blank, today()));
    }

    #[test]
    fn birth_date_rules() {
        let check = |d| can_advance(Step::BirthDate, &StepForm::BirthDate { date: d }, today());
        assert!(check(date(1990, 5, 1)));
        assert!(check(date(2016, 10, 19)));
        assert!(!check(date(2016, 10, 20)));
        assert!(!check(date(2020, 1, 1)));
        assert!(!check(date(1900, 1, 1)));
    }

    #[test]
    fn birth_date_leap_day_today() {
        let leap_today = date(2028, 2, 29);
        let form = StepForm::BirthDate {
            date: date(2018, 2, 28),
        };
        assert!(can_advance(Step::BirthDate, &form, leap_today));
        let form = StepForm::BirthDate {
            date: date(2018, 3, 1),
        };
        assert!(!can_advance(Step::BirthDate, &form, leap_today));
    }

    #[test]
    fn goals_between_one_and_three_distinct() {
        use HealthGoal::*;
        let check = |selected: Vec<HealthGoal>| {
            can_advance(Step::Goals, &StepForm::Goals { selected }, today())
        };
        assert!(check(vec![Energy]));
        assert!(check(vec![Energy, Digestion, Immunity]));
        assert!(!check(vec![]));
        assert!(!check(vec![Energy, Digestion, Immunity, SkinHealth]));
        assert!(!check(vec![Energy, Energy]));
    }

    #[test]
    fn stress_must_move_off_default() {
        let check = |level| can_advance(Step::StressLevel, &StepForm::StressLevel { level }, today());
        assert!(check(1));
        assert!(check(10));
        assert!(!check(5));
        assert!(!check(0));
        assert!(!check(11));
    }

    #[test]
    fn sleep_needs_selection() {
        let form = StepForm::SleepQuality {
            rating: Some(SleepQuality::Poor),
        };
        assert!(can_advance(Step::SleepQuality, &form, today()));
    }

    #[test]
    fn phone_is_ten_ascii_digits() {
        let check =
            |n: &str| can_advance(Step::Phone, &StepForm::Phone { number: n.into() }, today());
        assert!(check("5551234567"));
        assert!(!check("555123456"));
        assert!(!check("55512345678"));
        assert!(!check("555-123-45"));
        assert!(!check("５５５１２３４５６７"));
    }

    #[test]
    fn informational_steps() {
        let info = StepForm::Informational;
        assert!(can_advance(Step::ScanIntro, &info, today()));
        assert!(can_advance(Step::ScanResults, &info, today()));
        assert!(!can_advance(Step::TongueScan, &info, today()));
        assert!(!can_advance(Step::MainApp, &info, today()));
    }

    #[test]
    fn mismatched_form_is_closed() {
        let phone = StepForm::Phone {
            number: "5551234567".into(),
        };
        assert!(!can_advance(Step::Name, &phone, today()));
        assert!(!can_advance(Step::ScanIntro, &phone, today()));
    }
}
