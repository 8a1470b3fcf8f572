//! Session lifecycle of `Token`: slot selection, login and finalisation.

mod common;

use common::{open_token, SoftToken, PIN, TOKEN_LABEL};
use edge_identity::token::{Token, TokenError};

#[test]
fn test_open_selects_slot_by_padded_label() {
    let (token, state) = open_token();
    assert_eq!(token.slot().0, 4);

    let state = state.borrow();
    assert_eq!(state.session_slot, Some(4));
    assert!(state.logged_in);
    assert_eq!(state.calls[..2], ["initialize", "slots"]);
}

#[test]
fn test_open_unknown_token_lists_available() {
    let soft = SoftToken::new();
    let state = soft.handle();

    let err = match Token::open(soft, "missing", PIN) {
        Err(e) => e,
        Ok(_) => panic!("opened a token that does not exist"),
    };
    match &err {
        TokenError::TokenNotFound { label, available } => {
            assert_eq!(label, "missing");
            assert_eq!(available, "'spare', 'edge'");
        }
        other => panic!("unexpected error: {other}"),
    }

    // The module was initialized, so it must have been finalized too
    assert_eq!(state.borrow().finalize_calls, 1);
}

#[test]
fn test_wrong_pin_finalizes_module() {
    let soft = SoftToken::new();
    let state = soft.handle();

    let err = Token::open(soft, TOKEN_LABEL, "0000").err().unwrap();
    assert!(matches!(
        err,
        TokenError::TokenModule {
            operation: "login",
            ..
        }
    ));
    assert!(err.to_string().contains("CKR_PIN_INCORRECT"));
    assert_eq!(state.borrow().finalize_calls, 1);
}

#[test]
fn test_empty_pin_skips_login() {
    let soft = SoftToken::new();
    let state = soft.handle();
    state.borrow_mut().required_pin = None;

    let token = Token::open(soft, TOKEN_LABEL, "").unwrap();
    assert!(!state.borrow().calls.contains(&"login"));
    token.finalise().unwrap();
}

#[test]
fn test_finalise_runs_once() {
    let (token, state) = open_token();
    token.finalise().unwrap();

    let state = state.borrow();
    assert_eq!(state.finalize_calls, 1);
    assert_eq!(state.session_slot, None);
}

#[test]
fn test_drop_finalizes_once() {
    let (token, state) = open_token();
    drop(token);
    assert_eq!(state.borrow().finalize_calls, 1);
}

#[test]
fn test_finalise_reports_module_failure() {
    let (token, state) = open_token();
    state.borrow_mut().fail_finalize = true;

    let err = token.finalise().unwrap_err();
    assert!(matches!(
        err,
        TokenError::TokenModule {
            operation: "finalize",
            ..
        }
    ));
    assert_eq!(state.borrow().finalize_calls, 1);
}
