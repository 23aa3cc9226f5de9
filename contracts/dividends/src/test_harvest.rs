#![cfg(test)]

use super::{DataKey, DividendsContract, DividendsContractClient, Error};
use soroban_sdk::{
    testutils::{Address as _, Ledger},
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

/// Enables the token at 100% cycle percent, stakes `allocation` for the user
/// and deposits `amount` into pending, all at timestamp 0.
fn stake_and_deposit(
    client: &DividendsContractClient,
    reward_token: &Address,
    user: &Address,
    allocation: i128,
    amount: i128,
) {
    client.mock_all_auths().enable_distributed_token(reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(reward_token, &10_000);
    client.mock_all_auths().allocate(user, &allocation);
    client
        .mock_all_auths()
        .add_dividends_to_pending(reward_token, &amount);
}

#[test]
fn test_sole_staker_harvests_full_deposit_after_one_cycle() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 5_000);
    stake_and_deposit(&client, &reward_token, &alice, 50, 5_000);

    // The deposit enters the stream at the first boundary and has fully
    // streamed by the second.
    set_timestamp(&env, 2_000);
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 5_000);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        5_000
    );
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 0);

    let token = TokenClient::new(&env, &reward_token);
    assert_eq!(token.balance(&alice), 5_000);
    assert_eq!(token.balance(&contract_id), 0);

    // A second harvest at the same time pays nothing.
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        0
    );
}

#[test]
fn test_harvest_all_pays_every_registered_token() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let token_a = setup_reward_token(&env, &handler, 1_000);
    let token_b = setup_reward_token(&env, &handler, 2_000);

    client.mock_all_auths().enable_distributed_token(&token_a);
    client.mock_all_auths().enable_distributed_token(&token_b);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&token_a, &10_000);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&token_b, &10_000);
    client.mock_all_auths().allocate(&alice, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&token_a, &1_000);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&token_b, &2_000);

    set_timestamp(&env, 2_000);
    assert_eq!(client.mock_all_auths().harvest_all_dividends(&alice), 3_000);
    assert_eq!(TokenClient::new(&env, &token_a).balance(&alice), 1_000);
    assert_eq!(TokenClient::new(&env, &token_b).balance(&alice), 2_000);
}

#[test]
fn test_harvest_on_unregistered_token_is_rejected() {
    let (env, contract_id, _owner, _source, _handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let unknown = Address::generate(&env);

    assert_contract_error(
        client.mock_all_auths().try_harvest_dividends(&alice, &unknown),
        Error::InvalidToken,
    );
}

#[test]
fn test_harvest_rejected_while_transfer_in_progress() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 5_000);
    stake_and_deposit(&client, &reward_token, &alice, 50, 5_000);

    set_timestamp(&env, 2_000);
    let owed_before = client.pending_dividends_amount(&reward_token, &alice);
    assert_eq!(owed_before, 5_000);

    // Simulate an in-flight transfer: the guard flag is set, as it would be
    // when a transfer recipient re-enters mid-harvest.
    env.as_contract(&contract_id, || {
        env.storage()
            .instance()
            .set(&DataKey::OperationInProgress, &true);
    });
    assert_contract_error(
        client.mock_all_auths().try_harvest_dividends(&alice, &reward_token),
        Error::ReentrancyRejected,
    );
    // The rejected call changed nothing.
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 5_000);
    assert_eq!(TokenClient::new(&env, &reward_token).balance(&alice), 0);

    env.as_contract(&contract_id, || {
        env.storage()
            .instance()
            .set(&DataKey::OperationInProgress, &false);
    });
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        5_000
    );
}

#[test]
fn test_guard_releases_after_successful_harvest() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 6_000);
    stake_and_deposit(&client, &reward_token, &alice, 50, 5_000);

    set_timestamp(&env, 2_000);
    client.mock_all_auths().harvest_dividends(&alice, &reward_token);
    // Back-to-back entry points work; the guard does not stick.
    client.mock_all_auths().harvest_all_dividends(&alice);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &1_000);
}

#[test]
fn test_harvest_pays_at_most_the_contract_balance() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 5_000);
    stake_and_deposit(&client, &reward_token, &alice, 50, 5_000);

    set_timestamp(&env, 2_000);
    // Drain the contract out-of-band: the owed amount now exceeds the
    // balance and the harvest pays what is available instead of failing.
    client.mock_all_auths().emergency_withdraw(&reward_token);
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 5_000);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        0
    );
}

#[test]
fn test_reregistered_token_does_not_claw_back_dividends() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 6_000);
    stake_and_deposit(&client, &reward_token, &alice, 50, 5_000);

    set_timestamp(&env, 2_000);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        5_000
    );
    // Retire the drained cycle, then take the token through its full
    // lifecycle: disable, remove, re-register.
    client.update_dividends_info(&reward_token);
    client.mock_all_auths().disable_distributed_token(&reward_token);
    client.mock_all_auths().remove_distributed_token(&reward_token);
    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);

    // Alice's persistent reward debt outlived the removal; the restarted
    // accumulator sits below it. The stale debt is absorbed, never paid
    // out as a negative amount.
    assert_eq!(client.pending_dividends_amount(&reward_token, &alice), 0);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        0
    );

    // From here the new incarnation pays out in full.
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &1_000);
    set_timestamp(&env, 4_000);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        1_000
    );
    let token = TokenClient::new(&env, &reward_token);
    assert_eq!(token.balance(&alice), 6_000);
}

#[test]
fn test_harvest_with_no_accrual_pays_zero() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let alice = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client.mock_all_auths().allocate(&alice, &10);
    assert_eq!(
        client.mock_all_auths().harvest_dividends(&alice, &reward_token),
        0
    );
}
