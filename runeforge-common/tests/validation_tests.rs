use bitcoin::Network;
use runeforge_common::runestone::{Terms, MAX_OP_RETURN_DATA};
use runeforge_common::types::RuneEtchingRequest;
use runeforge_common::validation::{validate, EtchingValidator, ValidationError};

const MAINNET_P2TR: &str = "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr";
const TESTNET_P2WPKH: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

fn open_mint() -> RuneEtchingRequest {
    RuneEtchingRequest::new("Mint", "MINT", 2).with_terms(Terms {
        amount: Some(100),
        cap: Some(10_000),
        height: (Some(840_000), Some(850_000)),
        offset: (None, None),
    })
}

#[test]
fn open_mint_is_accepted_and_fits() {
    let request = open_mint();
    assert_eq!(validate(&request), Ok(()));

    let script = request.to_runestone().unwrap().to_script().unwrap();
    assert!(script.len() <= MAX_OP_RETURN_DATA);
}

#[test]
fn twelve_letter_cap_rejects_thirteen() {
    let request = RuneEtchingRequest::new("Too long", "TOOLONGSYMBOL", 0);
    assert_eq!(
        validate(&request),
        Err(ValidationError::SymbolTooLong { letters: 13, max: 12 })
    );
}

#[test]
fn spacers_do_not_count_towards_the_cap() {
    let request = RuneEtchingRequest::new("Goods", "UNCOMMON•GOOD", 0);
    assert_eq!(validate(&request), Ok(()));

    let tighter = EtchingValidator::new(Network::Bitcoin, 11);
    assert_eq!(
        tighter.validate(&request),
        Err(ValidationError::SymbolTooLong { letters: 12, max: 11 })
    );
}

#[test]
fn cap_is_configurable() {
    let request = RuneEtchingRequest::new("Long", "ABCDEFGHIJKLMNOPQRSTUVWXYZ", 0);
    assert!(validate(&request).is_err());
    assert_eq!(EtchingValidator::new(Network::Bitcoin, 26).validate(&request), Ok(()));
}

#[test]
fn bad_symbols_are_rejected() {
    assert_eq!(
        validate(&RuneEtchingRequest::new("", "", 0)),
        Err(ValidationError::EmptySymbol)
    );
    assert_eq!(
        validate(&RuneEtchingRequest::new("x", "AB1", 0)),
        Err(ValidationError::InvalidSymbolCharacter('1'))
    );
    assert_eq!(
        validate(&RuneEtchingRequest::new("x", "•AB", 0)),
        Err(ValidationError::MisplacedSpacer(0))
    );
    assert_eq!(
        validate(&RuneEtchingRequest::new("x", "AB•", 0)),
        Err(ValidationError::MisplacedSpacer(2))
    );
}

#[test]
fn divisibility_above_38_is_rejected() {
    assert_eq!(
        validate(&RuneEtchingRequest::new("x", "DIV", 39)),
        Err(ValidationError::DivisibilityOutOfRange(39))
    );
    assert_eq!(validate(&RuneEtchingRequest::new("x", "DIV", 38)), Ok(()));
}

#[test]
fn inverted_windows_are_rejected() {
    let request = RuneEtchingRequest::new("x", "WINDOW", 0).with_terms(Terms {
        amount: Some(1),
        cap: Some(1),
        height: (Some(900), Some(800)),
        offset: (None, None),
    });
    assert_eq!(
        validate(&request),
        Err(ValidationError::InvalidHeightWindow { start: 900, end: 800 })
    );
}

#[test]
fn supply_must_fit_u128() {
    let request = RuneEtchingRequest::new("x", "HUGE", 0)
        .with_premine(u128::MAX)
        .with_terms(Terms {
            amount: Some(1),
            cap: Some(1),
            ..Default::default()
        });
    assert_eq!(validate(&request), Err(ValidationError::SupplyOverflow));
}

#[test]
fn disjoint_windows_fail_only_with_a_known_height() {
    let request = RuneEtchingRequest::new("x", "LATE", 0).with_terms(Terms {
        amount: Some(1),
        cap: Some(10),
        height: (None, Some(840_010)),
        offset: (Some(100), None),
    });

    let validator = EtchingValidator::default();
    assert_eq!(validator.validate(&request), Ok(()));
    assert_eq!(
        validator.validate_at(&request, Some(840_001)),
        Err(ValidationError::ContradictoryMintWindows(840_001))
    );
}

#[test]
fn destinations_must_match_the_network() {
    let mainnet = EtchingValidator::new(Network::Bitcoin, 12);
    let request = RuneEtchingRequest::new("x", "DEST", 0).with_destination(TESTNET_P2WPKH);
    assert!(matches!(
        mainnet.validate(&request),
        Err(ValidationError::NetworkMismatch { .. })
    ));

    let address = mainnet.validate_destination(MAINNET_P2TR).unwrap();
    assert!(address.script_pubkey().is_v1_p2tr());

    assert!(matches!(
        mainnet.validate_destination("not an address"),
        Err(ValidationError::InvalidDestination(_))
    ));
}
