#![cfg(test)]

use super::{
    DividendsContract, DividendsContractClient, Error, DEFAULT_CYCLE_DIVIDENDS_PERCENT,
    MAX_DISTRIBUTED_TOKENS,
};
use soroban_sdk::{
    testutils::{Address as _, AuthorizedFunction, Ledger},
    token::{Client as TokenClient, StellarAssetClient},
    Address, Env, InvokeError,
};

fn set_timestamp(env: &Env, timestamp: u64) {
    env.ledger().with_mut(|li| {
        li.timestamp = timestamp;
    });
}

fn assert_contract_error<T, C>(
    result: Result<Result<T, C>, Result<Error, InvokeError>>,
    expected: Error,
) {
    assert!(matches!(result, Err(Ok(err)) if err == expected));
}

fn setup(cycle_duration: u64) -> (Env, Address, Address, Address, Address) {
    let env = Env::default();
    let owner = Address::generate(&env);
    let source = Address::generate(&env);
    let handler = Address::generate(&env);
    let contract_id = env.register_contract(None, DividendsContract);
    let client = DividendsContractClient::new(&env, &contract_id);
    client
        .mock_all_auths()
        .initialize(&owner, &source, &handler, &cycle_duration, &0);
    (env, contract_id, owner, source, handler)
}

fn setup_reward_token(env: &Env, handler: &Address, supply: i128) -> Address {
    let token_admin = Address::generate(env);
    let token_address = env
        .register_stellar_asset_contract_v2(token_admin.clone())
        .address();
    StellarAssetClient::new(env, &token_address)
        .mock_all_auths()
        .mint(handler, &supply);
    token_address
}

#[test]
fn test_enable_registers_token_with_defaults() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let reward_token = Address::generate(&env);

    client.mock_all_auths().enable_distributed_token(&reward_token);

    let tokens = client.distributed_tokens();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens.get_unchecked(0), reward_token);

    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 0);
    assert_eq!(info.cycle_distributed_amount, 0);
    assert_eq!(info.pending_amount, 0);
    assert_eq!(info.distributed_amount, 0);
    assert_eq!(info.acc_dividends_per_share, 0);
    assert_eq!(info.dividends_amount_per_second, 0);
    assert_eq!(info.cycle_dividends_percent, DEFAULT_CYCLE_DIVIDENDS_PERCENT);
    assert!(!info.distribution_disabled);
}

#[test]
fn test_enable_active_token_is_rejected() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let reward_token = Address::generate(&env);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_enable_distributed_token(&reward_token),
        Error::InvalidState,
    );
}

#[test]
fn test_disable_twice_is_rejected() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let reward_token = Address::generate(&env);
    let unknown = Address::generate(&env);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client.mock_all_auths().disable_distributed_token(&reward_token);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_disable_distributed_token(&reward_token),
        Error::InvalidState,
    );
    assert_contract_error(
        client.mock_all_auths().try_disable_distributed_token(&unknown),
        Error::InvalidToken,
    );
}

#[test]
fn test_registry_capacity_is_bounded() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);

    for _ in 0..MAX_DISTRIBUTED_TOKENS {
        let reward_token = Address::generate(&env);
        client.mock_all_auths().enable_distributed_token(&reward_token);
    }
    assert_eq!(client.distributed_tokens().len(), MAX_DISTRIBUTED_TOKENS);

    let one_too_many = Address::generate(&env);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_enable_distributed_token(&one_too_many),
        Error::CapacityExceeded,
    );
}

#[test]
fn test_cycle_percent_bounds_are_enforced() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let reward_token = Address::generate(&env);
    let unknown = Address::generate(&env);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_update_cycle_dividends_percent(&reward_token, &0),
        Error::OutOfBounds,
    );
    assert_contract_error(
        client
            .mock_all_auths()
            .try_update_cycle_dividends_percent(&reward_token, &10_001),
        Error::OutOfBounds,
    );
    assert_contract_error(
        client
            .mock_all_auths()
            .try_update_cycle_dividends_percent(&unknown, &5_000),
        Error::InvalidToken,
    );

    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &1);
    assert_eq!(client.get_dividends_info(&reward_token).cycle_dividends_percent, 1);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    assert_eq!(
        client.get_dividends_info(&reward_token).cycle_dividends_percent,
        10_000
    );
}

#[test]
fn test_percent_change_applies_at_next_boundary() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 10_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client.mock_all_auths().allocate(&alice, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &10_000);

    // First boundary pulls 1% (the default percent).
    set_timestamp(&env, 1_000);
    client.update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 100);
    assert_eq!(info.pending_amount, 9_900);

    // Raising the percent mid-cycle leaves the running stream alone; the
    // next boundary pulls at the new percent.
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    assert_eq!(
        client
            .get_dividends_info(&reward_token)
            .current_distribution_amount,
        100
    );

    set_timestamp(&env, 2_000);
    client.update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 9_900);
    assert_eq!(info.pending_amount, 0);
    assert_eq!(info.distributed_amount, 100);
}

#[test]
fn test_disable_lets_current_cycle_drain() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 9_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &5_000);
    client.mock_all_auths().allocate(&alice, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &9_000);

    set_timestamp(&env, 1_000);
    client.update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 4_500);
    assert_eq!(info.pending_amount, 4_500);

    // Disabling mid-cycle does not interrupt the in-flight stream.
    set_timestamp(&env, 1_200);
    client.mock_all_auths().disable_distributed_token(&reward_token);
    set_timestamp(&env, 1_500);
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 2_250);

    // At the boundary the cycle retires normally but nothing new is pulled.
    set_timestamp(&env, 2_000);
    client.update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 0);
    assert_eq!(info.dividends_amount_per_second, 0);
    assert_eq!(info.pending_amount, 4_500);
    assert_eq!(info.distributed_amount, 4_500);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        4_500
    );

    // Re-enabling resumes boundary pulls with the untouched pending slot.
    client.mock_all_auths().enable_distributed_token(&reward_token);
    set_timestamp(&env, 3_000);
    client.update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 2_250);
    assert_eq!(info.pending_amount, 2_250);
}

#[test]
fn test_remove_requires_disabled_and_drained() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&alice, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &1_000);

    set_timestamp(&env, 1_000);
    client.update_dividends_info(&reward_token);

    // Still active.
    assert_contract_error(
        client
            .mock_all_auths()
            .try_remove_distributed_token(&reward_token),
        Error::InvalidState,
    );

    // Disabled, but the current cycle is still draining.
    client.mock_all_auths().disable_distributed_token(&reward_token);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_remove_distributed_token(&reward_token),
        Error::InvalidState,
    );

    set_timestamp(&env, 2_000);
    client.update_dividends_info(&reward_token);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        1_000
    );
    client.mock_all_auths().remove_distributed_token(&reward_token);
    assert_eq!(client.distributed_tokens().len(), 0);
    assert_contract_error(
        client.try_get_dividends_info(&reward_token),
        Error::InvalidToken,
    );
}

#[test]
fn test_initialize_guards() {
    let (env, contract_id, owner, source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_initialize(&owner, &source, &handler, &1_000, &0),
        Error::AlreadyInitialized,
    );

    let env = Env::default();
    let owner = Address::generate(&env);
    let source = Address::generate(&env);
    let handler = Address::generate(&env);
    let contract_id = env.register_contract(None, DividendsContract);
    let client = DividendsContractClient::new(&env, &contract_id);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_initialize(&owner, &source, &handler, &0, &0),
        Error::InvalidAmount,
    );
    // Everything else is inert until initialization succeeds.
    assert_contract_error(
        client.mock_all_auths().try_allocate(&owner, &100),
        Error::NotInitialized,
    );
}

#[test]
fn test_add_to_current_cycle_requires_stakers() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000);
    client.mock_all_auths().enable_distributed_token(&reward_token);

    assert_contract_error(
        client
            .mock_all_auths()
            .try_add_dividends_to_current_cycle(&reward_token, &1_000),
        Error::InvalidState,
    );

    client.mock_all_auths().allocate(&alice, &10);
    let unknown = Address::generate(&env);
    assert_contract_error(
        client
            .mock_all_auths()
            .try_add_dividends_to_current_cycle(&unknown, &1_000),
        Error::InvalidToken,
    );
    assert_contract_error(
        client
            .mock_all_auths()
            .try_add_dividends_to_current_cycle(&reward_token, &0),
        Error::InvalidAmount,
    );
}

#[test]
fn test_emergency_withdraw_sweeps_balance_only() {
    let (env, contract_id, owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 5_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client.mock_all_auths().allocate(&alice, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &5_000);

    set_timestamp(&env, 500);
    assert_eq!(client.mock_all_auths().emergency_withdraw(&reward_token), 5_000);

    let token = TokenClient::new(&env, &reward_token);
    assert_eq!(token.balance(&owner), 5_000);
    assert_eq!(token.balance(&contract_id), 0);

    // Accounting is deliberately untouched by the sweep.
    assert_eq!(client.get_dividends_info(&reward_token).pending_amount, 5_000);

    assert_contract_error(
        client.mock_all_auths().try_emergency_withdraw(&reward_token),
        Error::InvalidState,
    );
}

#[test]
fn test_registry_changes_require_owner_auth() {
    let (env, contract_id, owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let reward_token = Address::generate(&env);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    let auths = env.auths();
    assert_eq!(auths.len(), 1);
    assert_eq!(auths[0].0, owner);
    assert!(matches!(
        auths[0].1.function,
        AuthorizedFunction::Contract((_, _, _))
    ));
}
