use super::{exit_code, parse_date};
use crate::app::AppError;
use crate::domain::timestamp::DateBound;
use crate::locks::LockError;

#[test]
fn client_errors_exit_one_and_internal_errors_exit_two() {
    assert_eq!(exit_code(&AppError::Validation("bad".to_string())), 1);
    assert_eq!(exit_code(&AppError::NotFound("gone".to_string())), 1);
    assert_eq!(
        exit_code(&AppError::PeriodHasReports {
            period_id: "P-1".to_string(),
            count: 2,
        }),
        1
    );
    assert_eq!(
        exit_code(&AppError::Lock(LockError::Busy {
            period_id: "P-1".to_string(),
            waited: std::time::Duration::from_millis(5),
        })),
        1
    );
    assert_eq!(
        exit_code(&AppError::Io(std::io::Error::other("disk"))),
        2
    );
}

#[test]
fn bad_dates_surface_as_validation_errors() {
    let err = parse_date("31/03/2025", DateBound::End).expect_err("not a supported format");
    assert_eq!(err.kind().as_str(), "validation");
    assert_eq!(err.status_code(), 400);

    let end = parse_date("2025-03-31", DateBound::End).expect("bare date should parse");
    assert_eq!(end.hour(), 23);
}
