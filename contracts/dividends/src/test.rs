#![cfg(test)]

use super::{
    DividendsContract, DividendsContractClient, DividendsInfo, ACC_DIVIDENDS_PRECISION,
};
use soroban_sdk::{
    testutils::{Address as _, Ledger},
    token::StellarAssetClient,
    Address, Env,
};

fn set_timestamp(env: &Env, timestamp: u64) {
    env.ledger().with_mut(|li| {
        li.timestamp = timestamp;
    });
}

/// Registers the contract and initializes it with a fresh owner, allocation
/// source and deposit handler. Returns (env, contract, owner, source, handler).
fn setup(cycle_duration: u64, cycle_start_time: u64) -> (Env, Address, Address, Address, Address) {
    let env = Env::default();
    let owner = Address::generate(&env);
    let source = Address::generate(&env);
    let handler = Address::generate(&env);
    let contract_id = env.register_contract(None, DividendsContract);
    let client = DividendsContractClient::new(&env, &contract_id);
    client
        .mock_all_auths()
        .initialize(&owner, &source, &handler, &cycle_duration, &cycle_start_time);
    (env, contract_id, owner, source, handler)
}

/// Deploys a Stellar asset usable as a reward token and mints `supply` to
/// the deposit handler.
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

fn conserved_total(info: &DividendsInfo) -> i128 {
    info.pending_amount + info.current_distribution_amount + info.distributed_amount
}

#[test]
fn test_deposit_sits_in_pending_until_cycle_boundary() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&user, &100);

    set_timestamp(&env, 100);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &500_000);

    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.pending_amount, 500_000);
    assert_eq!(info.current_distribution_amount, 0);
    assert_eq!(info.acc_dividends_per_share, 0);
    assert_eq!(conserved_total(&info), 500_000);

    // Crossing the boundary commits the whole pending slot (100%).
    set_timestamp(&env, 1_000);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 500_000);
    assert_eq!(info.pending_amount, 0);
    assert_eq!(info.dividends_amount_per_second, 50_000);
    assert_eq!(conserved_total(&info), 500_000);

    // Half a cycle later, half the committed amount is claimable.
    set_timestamp(&env, 1_500);
    assert_eq!(client.pending_dividends_amount(&reward_token, &user), 250_000);
}

#[test]
fn test_seven_day_cycle_scenario() {
    const WEEK: u64 = 604_800;
    let (env, contract_id, _owner, _source, handler) = setup(WEEK, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 7_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &1_000); // 10%
    client.mock_all_auths().allocate(&user, &1);

    set_timestamp(&env, 1);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &7_000);

    // First boundary: 10% of the pending slot enters the stream.
    set_timestamp(&env, WEEK);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 700);
    assert_eq!(info.pending_amount, 6_300);
    assert_eq!(conserved_total(&info), 7_000);

    // One full cycle later the whole 700 has been credited to the sole
    // allocator and the next 10% slice is committed.
    set_timestamp(&env, 2 * WEEK);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.acc_dividends_per_share, 700 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(info.distributed_amount, 700);
    assert_eq!(info.current_distribution_amount, 630);
    assert_eq!(info.pending_amount, 5_670);
    assert_eq!(conserved_total(&info), 7_000);

    assert_eq!(client.mock_all_auths().harvest_dividends(&user, &reward_token), 700);
}

#[test]
fn test_settlement_is_idempotent_at_same_timestamp() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 100_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&user, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &100_000);

    set_timestamp(&env, 1_400);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let first = client.get_dividends_info(&reward_token);
    client.mock_all_auths().update_dividends_info(&reward_token);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let second = client.get_dividends_info(&reward_token);
    assert_eq!(first, second);
}

#[test]
fn test_nothing_accrues_before_first_cycle_start() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 5_000);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&user, &10);

    set_timestamp(&env, 10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &1_000);

    // Deposited funds sit idle until the configured start.
    set_timestamp(&env, 3_000);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.pending_amount, 1_000);
    assert_eq!(info.current_distribution_amount, 0);
    assert_eq!(info.acc_dividends_per_share, 0);

    // Halfway into the first cycle the full slice is streaming.
    set_timestamp(&env, 5_500);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 1_000);
    assert_eq!(info.pending_amount, 0);
    assert_eq!(info.cycle_distributed_amount, 50_000);
    assert_eq!(info.acc_dividends_per_share, 50 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(conserved_total(&info), 1_000);
}

#[test]
fn test_nothing_accrues_while_total_allocation_is_zero() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 800);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &800);

    set_timestamp(&env, 2_500);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.pending_amount, 800);
    assert_eq!(info.current_distribution_amount, 0);
    assert_eq!(info.acc_dividends_per_share, 0);

    client.mock_all_auths().allocate(&user, &4);

    // Streaming only begins at the next boundary after stake appears.
    set_timestamp(&env, 3_000);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 800);
    assert_eq!(info.pending_amount, 0);

    set_timestamp(&env, 3_500);
    assert_eq!(client.pending_dividends_amount(&reward_token, &user), 400);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(conserved_total(&info), 800);
}

#[test]
fn test_cycle_cap_holds_after_long_idle_gap() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 100_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &10_000);
    client.mock_all_auths().allocate(&user, &5);

    set_timestamp(&env, 10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &100_000);

    // 2.5 cycles of silence: elapsed * rate would overshoot, the cap clamps
    // the accrual to the cycle's full commitment and no more.
    set_timestamp(&env, 3_500);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 100_000);
    assert_eq!(info.cycle_distributed_amount, 100_000 * 100);
    assert_eq!(info.acc_dividends_per_share, 20_000 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(info.distributed_amount, 0);
    assert_eq!(conserved_total(&info), 100_000);

    // Once capped, further elapsed time credits nothing.
    set_timestamp(&env, 3_600);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.acc_dividends_per_share, 20_000 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(info.cycle_distributed_amount, 100_000 * 100);

    // Missed boundaries are worked off one clock step per settlement; the
    // stream is only retired into distributed_amount once the lazily
    // advancing cycle start passes the last settlement time. Conservation
    // holds at every intermediate step.
    set_timestamp(&env, 3_700);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.distributed_amount, 0);
    assert_eq!(conserved_total(&info), 100_000);

    set_timestamp(&env, 4_700);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.distributed_amount, 100_000);
    assert_eq!(info.current_distribution_amount, 0);
    assert_eq!(info.acc_dividends_per_share, 20_000 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(conserved_total(&info), 100_000);
}

#[test]
fn test_conservation_and_monotonicity_across_mixed_operations() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 13_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client
        .mock_all_auths()
        .update_cycle_dividends_percent(&reward_token, &5_000); // 50%
    client.mock_all_auths().allocate(&user, &100);

    set_timestamp(&env, 100);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&reward_token, &10_000);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(conserved_total(&info), 10_000);
    let mut last_acc = info.acc_dividends_per_share;
    let mut last_distributed = info.distributed_amount;

    set_timestamp(&env, 1_000);
    client.mock_all_auths().update_dividends_info(&reward_token);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 5_000);
    assert_eq!(info.pending_amount, 5_000);
    assert_eq!(conserved_total(&info), 10_000);
    assert!(info.acc_dividends_per_share >= last_acc);
    assert!(info.distributed_amount >= last_distributed);
    last_acc = info.acc_dividends_per_share;
    last_distributed = info.distributed_amount;

    // Top up the in-flight cycle directly: the commitment grows and the
    // rate is re-derived over the remaining 800 seconds.
    set_timestamp(&env, 1_200);
    client
        .mock_all_auths()
        .add_dividends_to_current_cycle(&reward_token, &3_000);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.current_distribution_amount, 8_000);
    assert_eq!(info.dividends_amount_per_second, 875);
    assert_eq!(conserved_total(&info), 13_000);
    assert!(info.acc_dividends_per_share >= last_acc);
    last_acc = info.acc_dividends_per_share;

    // At the boundary the full commitment is banked and the harvest pays
    // the user's entire time-weighted share of it.
    set_timestamp(&env, 2_000);
    let payout = client.mock_all_auths().harvest_dividends(&user, &reward_token);
    assert_eq!(payout, 8_000);
    let info = client.get_dividends_info(&reward_token);
    assert_eq!(info.distributed_amount, 8_000);
    assert_eq!(info.current_distribution_amount, 2_500);
    assert_eq!(info.pending_amount, 2_500);
    assert_eq!(conserved_total(&info), 13_000);
    assert!(info.acc_dividends_per_share >= last_acc);
    assert!(info.distributed_amount >= last_distributed);
}

#[test]
fn test_mass_update_settles_every_registered_token() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
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
    client.mock_all_auths().allocate(&user, &10);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&token_a, &1_000);
    client
        .mock_all_auths()
        .add_dividends_to_pending(&token_b, &2_000);

    // One call carries every token across the boundary and half a cycle in.
    set_timestamp(&env, 1_500);
    client.mass_update_dividends_info();

    let info_a = client.get_dividends_info(&token_a);
    assert_eq!(info_a.current_distribution_amount, 1_000);
    assert_eq!(info_a.pending_amount, 0);
    assert_eq!(info_a.cycle_distributed_amount, 50_000);
    assert_eq!(info_a.acc_dividends_per_share, 50 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(conserved_total(&info_a), 1_000);

    let info_b = client.get_dividends_info(&token_b);
    assert_eq!(info_b.current_distribution_amount, 2_000);
    assert_eq!(info_b.pending_amount, 0);
    assert_eq!(info_b.cycle_distributed_amount, 100_000);
    assert_eq!(info_b.acc_dividends_per_share, 100 * ACC_DIVIDENDS_PRECISION);
    assert_eq!(conserved_total(&info_b), 2_000);

    // Re-running at the same timestamp changes nothing.
    client.mass_update_dividends_info();
    assert_eq!(client.get_dividends_info(&token_a), info_a);
    assert_eq!(client.get_dividends_info(&token_b), info_b);
}

#[test]
fn test_cycle_clock_views_advance_lazily() {
    let (env, contract_id, _owner, _source, handler) = setup(1_000, 0);
    let client = DividendsContractClient::new(&env, &contract_id);
    let user = Address::generate(&env);
    let reward_token = setup_reward_token(&env, &handler, 1_000);

    client.mock_all_auths().enable_distributed_token(&reward_token);
    client.mock_all_auths().allocate(&user, &1);

    assert_eq!(client.current_cycle_start_time(), 0);
    assert_eq!(client.next_cycle_start_time(), 1_000);

    // The clock only moves when some settlement observes the new time.
    set_timestamp(&env, 1_600);
    assert_eq!(client.current_cycle_start_time(), 0);
    client.mock_all_auths().update_dividends_info(&reward_token);
    assert_eq!(client.current_cycle_start_time(), 1_000);
    assert_eq!(client.next_cycle_start_time(), 2_000);
}
