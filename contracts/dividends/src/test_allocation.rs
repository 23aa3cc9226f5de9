#![cfg(test)]

use super::{DividendsContract, DividendsContractClient, Error};
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
fn test_allocate_and_deallocate_update_balances() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let bob = Address::generate(&env);

    client.mock_all_auths().allocate(&alice, &300);
    client.mock_all_auths().allocate(&bob, &200);
    assert_eq!(client.users_allocation(&alice), 300);
    assert_eq!(client.users_allocation(&bob), 200);
    assert_eq!(client.total_allocation(), 500);

    client.mock_all_auths().deallocate(&alice, &100);
    assert_eq!(client.users_allocation(&alice), 200);
    assert_eq!(client.total_allocation(), 400);
}

#[test]
fn test_deallocate_beyond_stake_is_rejected() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);

    client.mock_all_auths().allocate(&alice, &100);
    assert_contract_error(
        client.mock_all_auths().try_deallocate(&alice, &101),
        Error::InsufficientStake,
    );
    // State is untouched by the rejected call.
    assert_eq!(client.users_allocation(&alice), 100);
    assert_eq!(client.total_allocation(), 100);
}

#[test]
fn test_allocation_rejects_non_positive_amounts() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);

    assert_contract_error(
        client.mock_all_auths().try_allocate(&alice, &0),
        Error::InvalidAmount,
    );
    assert_contract_error(
        client.mock_all_auths().try_allocate(&alice, &-5_i128),
        Error::InvalidAmount,
    );
    assert_contract_error(
        client.mock_all_auths().try_deallocate(&alice, &0),
        Error::InvalidAmount,
    );
}

#[test]
fn test_allocate_requires_allocation_source_auth() {
    let (env, contract_id, _owner, source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);

    client.mock_all_auths().allocate(&alice, &50);
    let auths = env.auths();
    assert_eq!(auths.len(), 1);
    assert_eq!(auths[0].0, source);
    assert!(matches!(
        auths[0].1.function,
        AuthorizedFunction::Contract((_, _, _))
    ));
}

#[test]
fn test_mid_cycle_stake_increase_splits_stream_by_stake_time() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let bob = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&alice, &100);
    client.mock_all_auths().allocate(&bob, &100);

    set_timestamp(&env, 100);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &1_000_000);

    // Halfway through the streaming cycle [1000, 2000) Alice doubles her
    // stake. Settlement runs against her old stake first, so the first half
    // is still split evenly.
    set_timestamp(&env, 1_500);
    client.mock_all_auths().allocate(&alice, &100);

    set_timestamp(&env, 2_000);
    let alice_payout = client.mock_all_auths().harvest_dividends(&alice, &reward_token);
    let bob_payout = client.mock_all_auths().harvest_dividends(&bob, &reward_token);

    // First half: 250_000 each. Second half: Alice 2/3, Bob 1/3 of 500_000.
    assert_eq!(alice_payout, 583_333);
    assert_eq!(bob_payout, 416_666);

    // Rounding dust stays in the contract; nothing was over-paid.
    let token = TokenClient::new(&env, &reward_token);
    assert_eq!(token.balance(&alice), 583_333);
    assert_eq!(token.balance(&bob), 416_666);
    assert_eq!(token.balance(&contract_id), 1);
}

#[test]
fn test_late_staker_earns_nothing_retroactively() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let bob = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&alice, &100);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &1_000_000);

    // Bob arrives halfway through the streaming cycle. His reward debt is
    // based on the accumulator at entry, so the first half is Alice's alone.
    set_timestamp(&env, 1_500);
    client.mock_all_auths().allocate(&bob, &100);

    set_timestamp(&env, 2_000);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        750_000
    );
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&bob, &reward_token),
        250_000
    );
}

#[test]
fn test_full_deallocation_preserves_banked_dividends() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 10_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&alice, &50);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &10_000);

    // Stream for half a cycle, then exit entirely. The accrued 5_000 is
    // banked during the deallocation settlement.
    set_timestamp(&env, 1_500);
    client.mock_all_auths().deallocate(&alice, &50);
    assert_eq!(client.users_allocation(&alice), 0);
    assert_eq!(client.total_allocation(), 0);
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 5_000);

    set_timestamp(&env, 2_000);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        5_000
    );
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 0);
}
