use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt};
use sdk::types::{FailureKind, WorkerKind, WorkerResponse, WorkerStatus};

// Every error variant yields a static, non-empty hint that never echoes the
// raw message back to the user.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-zA-Z0-9/_.-]{12,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::UnknownWorker(error_str.clone()),
            EngineError::Network(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Worker kind names round-trip through their string form.
proptest! {
    #[test]
    fn test_worker_kind_string_round_trip(idx in 0usize..3, upper in any::<bool>()) {
        let kind = WorkerKind::ALL[idx];
        let text = if upper {
            kind.as_str().to_uppercase()
        } else {
            kind.as_str().to_string()
        };
        prop_assert_eq!(text.parse::<WorkerKind>().unwrap(), kind);
    }
}

// Error responses always carry the diagnostic as the result.
proptest! {
    #[test]
    fn test_error_response_result_is_diagnostic(diagnostic in "\\PC{0,64}") {
        let response = WorkerResponse::error(
            "SearchWorker",
            "task",
            FailureKind::Provider,
            diagnostic.clone(),
        );
        prop_assert_eq!(response.status, WorkerStatus::Error);
        prop_assert_eq!(&response.result, &diagnostic);
        prop_assert_eq!(response.failure_kind(), Some(FailureKind::Provider));
    }
}
