#![no_std]

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, Env, Vec,
};

/// Precision of the lifetime per-share dividends accumulator.
/// User entitlement is `allocation * acc_dividends_per_share / ACC_DIVIDENDS_PRECISION`.
pub const ACC_DIVIDENDS_PRECISION: i128 = 1_000_000_000_000_000_000; // 1e18

/// Sub-unit precision applied to per-second rates and the per-cycle
/// distributed counter, so that slow streams do not truncate to zero.
pub const RATE_PRECISION: i128 = 100;

/// Converts a RATE_PRECISION-scaled amount into an accumulator increment
/// (per unit of allocation) in one multiply.
const ACC_RATE_PRECISION: i128 = ACC_DIVIDENDS_PRECISION / RATE_PRECISION; // 1e16

pub const BPS_DENOMINATOR: i128 = 10_000;

/// Hard cap on the number of simultaneously registered reward tokens.
/// Every allocation change settles each of them, so the set must stay small.
pub const MAX_DISTRIBUTED_TOKENS: u32 = 10;

pub const MIN_CYCLE_DIVIDENDS_PERCENT: u32 = 1; // 0.01%
pub const DEFAULT_CYCLE_DIVIDENDS_PERCENT: u32 = 100; // 1%
pub const MAX_CYCLE_DIVIDENDS_PERCENT: u32 = 10_000; // 100%

#[contract]
pub struct DividendsContract;

/// Per reward-token distribution state.
///
/// Conservation: `pending_amount + current_distribution_amount +
/// distributed_amount` always equals the lifetime sum of deposits for the
/// token. `acc_dividends_per_share` and `distributed_amount` never decrease.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct DividendsInfo {
    /// Amount committed to stream during the active cycle.
    pub current_distribution_amount: i128,
    /// Portion of the active cycle's commitment already accrued into the
    /// accumulator, scaled by RATE_PRECISION. Never exceeds
    /// `current_distribution_amount * RATE_PRECISION`.
    pub cycle_distributed_amount: i128,
    /// Funds received but not yet committed to any cycle.
    pub pending_amount: i128,
    /// Lifetime total moved out of the streaming slot, fully accounted for.
    pub distributed_amount: i128,
    /// Lifetime accumulator of dividends per unit of allocation, scaled by
    /// ACC_DIVIDENDS_PRECISION.
    pub acc_dividends_per_share: i128,
    /// Streaming rate for the active cycle, scaled by RATE_PRECISION.
    pub dividends_amount_per_second: i128,
    pub last_update_time: u64,
    /// Fraction of `pending_amount` (basis points) committed to the stream
    /// at each cycle boundary.
    pub cycle_dividends_percent: u32,
    /// When set, the next cycle boundary commits nothing; the in-flight
    /// stream keeps draining until then.
    pub distribution_disabled: bool,
}

/// Per (token, user) settlement bookkeeping. Created lazily, never deleted.
#[derive(Clone, Debug, Eq, PartialEq)]
#[contracttype]
pub struct UserInfo {
    /// Banked dividends from past settlements, not yet harvested.
    pub pending_dividends: i128,
    /// `allocation * acc_dividends_per_share / ACC_DIVIDENDS_PRECISION` as
    /// of the user's last settlement; subtracted from future accumulator
    /// reads so historical accrual is never paid twice.
    pub reward_debt: i128,
}

#[derive(Clone)]
#[contracttype]
enum DataKey {
    Owner,
    /// Sole caller allowed to mutate allocations.
    AllocationSource,
    /// Sole caller allowed to deposit dividends.
    DepositHandler,
    CycleDuration,
    CycleStartTime,
    /// Registered reward tokens; membership spans enable through remove.
    DistributedTokens,
    DividendsInfo(Address),
    /// Keyed by (token, user).
    UserInfo(Address, Address),
    UserAllocation(Address),
    TotalAllocation,
    /// Reentrancy guard around entry points that perform token transfers.
    OperationInProgress,
}

#[contracterror]
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum Error {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    InvalidToken = 3,
    CapacityExceeded = 4,
    InvalidState = 5,
    InsufficientStake = 6,
    OutOfBounds = 7,
    ReentrancyRejected = 8,
    InvalidAmount = 9,
    MathOverflow = 10,
}

fn read_owner(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Owner)
        .ok_or(Error::NotInitialized)
}

fn require_owner_auth(env: &Env) -> Result<Address, Error> {
    let owner = read_owner(env)?;
    owner.require_auth();
    Ok(owner)
}

fn read_allocation_source(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::AllocationSource)
        .ok_or(Error::NotInitialized)
}

fn read_deposit_handler(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::DepositHandler)
        .ok_or(Error::NotInitialized)
}

fn read_cycle_duration(env: &Env) -> Result<u64, Error> {
    env.storage()
        .instance()
        .get(&DataKey::CycleDuration)
        .ok_or(Error::NotInitialized)
}

fn read_cycle_start_time(env: &Env) -> Result<u64, Error> {
    env.storage()
        .instance()
        .get(&DataKey::CycleStartTime)
        .ok_or(Error::NotInitialized)
}

fn read_distributed_tokens(env: &Env) -> Vec<Address> {
    env.storage()
        .instance()
        .get(&DataKey::DistributedTokens)
        .unwrap_or_else(|| Vec::new(env))
}

fn maybe_read_dividends_info(env: &Env, reward_token: &Address) -> Option<DividendsInfo> {
    env.storage()
        .instance()
        .get(&DataKey::DividendsInfo(reward_token.clone()))
}

fn read_dividends_info(env: &Env, reward_token: &Address) -> Result<DividendsInfo, Error> {
    maybe_read_dividends_info(env, reward_token).ok_or(Error::InvalidToken)
}

fn write_dividends_info(env: &Env, reward_token: &Address, info: &DividendsInfo) {
    env.storage()
        .instance()
        .set(&DataKey::DividendsInfo(reward_token.clone()), info);
}

fn read_user_info(env: &Env, reward_token: &Address, user: &Address) -> UserInfo {
    env.storage()
        .persistent()
        .get(&DataKey::UserInfo(reward_token.clone(), user.clone()))
        .unwrap_or(UserInfo {
            pending_dividends: 0,
            reward_debt: 0,
        })
}

fn write_user_info(env: &Env, reward_token: &Address, user: &Address, user_info: &UserInfo) {
    env.storage().persistent().set(
        &DataKey::UserInfo(reward_token.clone(), user.clone()),
        user_info,
    );
}

fn read_user_allocation(env: &Env, user: &Address) -> i128 {
    env.storage()
        .persistent()
        .get(&DataKey::UserAllocation(user.clone()))
        .unwrap_or(0)
}

fn read_total_allocation(env: &Env) -> i128 {
    env.storage()
        .instance()
        .get(&DataKey::TotalAllocation)
        .unwrap_or(0)
}

/// Checked `a * b / denom`. Callers guarantee `denom > 0`.
fn mul_div(a: i128, b: i128, denom: i128) -> Result<i128, Error> {
    a.checked_mul(b)
        .ok_or(Error::MathOverflow)?
        .checked_div(denom)
        .ok_or(Error::MathOverflow)
}

fn acquire_transfer_guard(env: &Env) -> Result<(), Error> {
    let in_progress: bool = env
        .storage()
        .instance()
        .get(&DataKey::OperationInProgress)
        .unwrap_or(false);
    if in_progress {
        return Err(Error::ReentrancyRejected);
    }
    env.storage()
        .instance()
        .set(&DataKey::OperationInProgress, &true);
    Ok(())
}

fn release_transfer_guard(env: &Env) {
    env.storage()
        .instance()
        .set(&DataKey::OperationInProgress, &false);
}

/// The cycle start the lazily advancing clock would show at `now`, moved
/// forward by at most one whole duration. Pure; read-only previews use this
/// directly.
fn effective_cycle_start(env: &Env, now: u64) -> Result<u64, Error> {
    let duration = read_cycle_duration(env)?;
    let start = read_cycle_start_time(env)?;
    let boundary = start.checked_add(duration).ok_or(Error::MathOverflow)?;
    if now >= boundary {
        return Ok(boundary);
    }
    Ok(start)
}

/// Advances the stored cycle clock by at most one whole duration. Called
/// exactly once at the top of every settling entry point, so that all
/// tokens settled within one invocation observe the same cycle window. A
/// gap of several cycles is worked off one boundary per invocation, not
/// fast forwarded in a single step.
fn advance_cycle_if_due(env: &Env, now: u64) -> Result<u64, Error> {
    let start = effective_cycle_start(env, now)?;
    env.storage()
        .instance()
        .set(&DataKey::CycleStartTime, &start);
    Ok(start)
}

/// Core settlement recurrence. Brings `info` up to `now`: banks the previous
/// cycle's remainder at a boundary crossing, commits a fresh slice of the
/// pending slot for the new cycle, then accrues elapsed streaming time into
/// the accumulator, clamped to the cycle's committed amount.
///
/// Must run before any read or mutation of allocation or accumulator state
/// for this token within the same invocation. `cycle_start` is the already
/// advanced clock value for this invocation.
fn settle_dividends_info(
    env: &Env,
    info: &mut DividendsInfo,
    cycle_start: u64,
    now: u64,
) -> Result<(), Error> {
    if now <= info.last_update_time {
        return Ok(());
    }

    let total_allocation = read_total_allocation(env);

    // Nothing accrues while no allocation exists or before the very first
    // cycle starts; deposited funds sit idle in their slots.
    if total_allocation == 0 || now < cycle_start {
        info.last_update_time = now;
        return Ok(());
    }

    if info.last_update_time < cycle_start {
        // A boundary was crossed since the last settlement: accrue whatever
        // the previous cycle's stream had not yet credited, then account the
        // whole commitment as distributed.
        let committed = info
            .current_distribution_amount
            .checked_mul(RATE_PRECISION)
            .ok_or(Error::MathOverflow)?;
        let remainder = committed
            .checked_sub(info.cycle_distributed_amount)
            .ok_or(Error::MathOverflow)?;
        if remainder > 0 {
            let share_increment = mul_div(remainder, ACC_RATE_PRECISION, total_allocation)?;
            info.acc_dividends_per_share = info
                .acc_dividends_per_share
                .checked_add(share_increment)
                .ok_or(Error::MathOverflow)?;
        }
        info.distributed_amount = info
            .distributed_amount
            .checked_add(info.current_distribution_amount)
            .ok_or(Error::MathOverflow)?;

        if info.distribution_disabled {
            info.current_distribution_amount = 0;
            info.dividends_amount_per_second = 0;
        } else {
            let duration = read_cycle_duration(env)?;
            let new_amount = mul_div(
                info.pending_amount,
                i128::from(info.cycle_dividends_percent),
                BPS_DENOMINATOR,
            )?;
            info.current_distribution_amount = new_amount;
            info.dividends_amount_per_second =
                mul_div(new_amount, RATE_PRECISION, i128::from(duration))?;
            info.pending_amount = info
                .pending_amount
                .checked_sub(new_amount)
                .ok_or(Error::MathOverflow)?;
        }
        info.cycle_distributed_amount = 0;
        info.last_update_time = cycle_start;
    }

    let elapsed = i128::from(now - info.last_update_time);
    let mut to_distribute = elapsed
        .checked_mul(info.dividends_amount_per_second)
        .ok_or(Error::MathOverflow)?;

    // Long idle gaps must not credit beyond the cycle's committed amount.
    let cap = info
        .current_distribution_amount
        .checked_mul(RATE_PRECISION)
        .ok_or(Error::MathOverflow)?;
    let headroom = cap
        .checked_sub(info.cycle_distributed_amount)
        .ok_or(Error::MathOverflow)?;
    if to_distribute > headroom {
        to_distribute = headroom;
    }

    info.cycle_distributed_amount = info
        .cycle_distributed_amount
        .checked_add(to_distribute)
        .ok_or(Error::MathOverflow)?;
    if to_distribute > 0 {
        let share_increment = mul_div(to_distribute, ACC_RATE_PRECISION, total_allocation)?;
        info.acc_dividends_per_share = info
            .acc_dividends_per_share
            .checked_add(share_increment)
            .ok_or(Error::MathOverflow)?;
    }
    info.last_update_time = now;
    Ok(())
}

/// Settles every registered token against the user's current allocation,
/// banks each accrued delta, then re-bases reward debt on the new
/// allocation. Settlement must see the old allocation and the old total, so
/// the caller updates those only after this returns.
fn settle_user_accounts(
    env: &Env,
    user: &Address,
    old_allocation: i128,
    new_allocation: i128,
    now: u64,
) -> Result<(), Error> {
    let cycle_start = advance_cycle_if_due(env, now)?;
    for reward_token in read_distributed_tokens(env).iter() {
        let mut info = read_dividends_info(env, &reward_token)?;
        settle_dividends_info(env, &mut info, cycle_start, now)?;
        write_dividends_info(env, &reward_token, &info);

        let mut user_info = read_user_info(env, &reward_token, user);
        let accrued = mul_div(old_allocation, info.acc_dividends_per_share, ACC_DIVIDENDS_PRECISION)?
            .checked_sub(user_info.reward_debt)
            .ok_or(Error::MathOverflow)?;
        if accrued > 0 {
            user_info.pending_dividends = user_info
                .pending_dividends
                .checked_add(accrued)
                .ok_or(Error::MathOverflow)?;
        }
        user_info.reward_debt = mul_div(
            new_allocation,
            info.acc_dividends_per_share,
            ACC_DIVIDENDS_PRECISION,
        )?;
        write_user_info(env, &reward_token, user, &user_info);
    }
    Ok(())
}

fn write_allocations(env: &Env, user: &Address, user_allocation: i128, total_allocation: i128) {
    env.storage()
        .persistent()
        .set(&DataKey::UserAllocation(user.clone()), &user_allocation);
    env.storage()
        .instance()
        .set(&DataKey::TotalAllocation, &total_allocation);
}

/// Settles one token for `user`, zeroes their banked dividends, re-bases
/// their debt and pays out, capped to the contract's actual balance. The cap
/// is a rounding-drift safety net, not a payment schedule: under correct
/// accounting the balance always covers the owed amount.
fn harvest_token(
    env: &Env,
    user: &Address,
    reward_token: &Address,
    cycle_start: u64,
    now: u64,
) -> Result<i128, Error> {
    let mut info = read_dividends_info(env, reward_token)?;
    settle_dividends_info(env, &mut info, cycle_start, now)?;
    write_dividends_info(env, reward_token, &info);

    let allocation = read_user_allocation(env, user);
    let mut user_info = read_user_info(env, reward_token, user);
    let debt_basis = mul_div(allocation, info.acc_dividends_per_share, ACC_DIVIDENDS_PRECISION)?;
    // A removed and later re-registered token restarts its accumulator at
    // zero while the persistent reward debt survives; stale debt must not
    // claw back banked dividends.
    let accrued = debt_basis
        .checked_sub(user_info.reward_debt)
        .ok_or(Error::MathOverflow)?
        .max(0);
    let owed = user_info
        .pending_dividends
        .checked_add(accrued)
        .ok_or(Error::MathOverflow)?;
    user_info.pending_dividends = 0;
    user_info.reward_debt = debt_basis;
    write_user_info(env, reward_token, user, &user_info);

    let contract = env.current_contract_address();
    let client = token::Client::new(env, reward_token);
    let balance = client.balance(&contract);
    let payout = if owed > balance { balance } else { owed };
    if payout > 0 {
        client.transfer(&contract, user, &payout);
    }

    env.events().publish(
        (symbol_short!("harvest"), reward_token.clone()),
        (user.clone(), payout),
    );
    Ok(payout)
}

fn preview_dividends_info(env: &Env, reward_token: &Address) -> Result<DividendsInfo, Error> {
    let mut info = read_dividends_info(env, reward_token)?;
    let now = env.ledger().timestamp();
    let cycle_start = effective_cycle_start(env, now)?;
    settle_dividends_info(env, &mut info, cycle_start, now)?;
    Ok(info)
}

#[contractimpl]
impl DividendsContract {
    /// One-time setup. `cycle_start_time` may lie in the future; nothing
    /// accrues before it.
    pub fn initialize(
        env: Env,
        owner: Address,
        allocation_source: Address,
        deposit_handler: Address,
        cycle_duration: u64,
        cycle_start_time: u64,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Owner) {
            return Err(Error::AlreadyInitialized);
        }
        if cycle_duration == 0 {
            return Err(Error::InvalidAmount);
        }
        owner.require_auth();
        env.storage().instance().set(&DataKey::Owner, &owner);
        env.storage()
            .instance()
            .set(&DataKey::AllocationSource, &allocation_source);
        env.storage()
            .instance()
            .set(&DataKey::DepositHandler, &deposit_handler);
        env.storage()
            .instance()
            .set(&DataKey::CycleDuration, &cycle_duration);
        env.storage()
            .instance()
            .set(&DataKey::CycleStartTime, &cycle_start_time);
        env.storage()
            .instance()
            .set(&DataKey::DistributedTokens, &Vec::<Address>::new(&env));
        env.storage().instance().set(&DataKey::TotalAllocation, &0_i128);
        Ok(())
    }

    /// Increases `user`'s allocation. Allocation source only.
    pub fn allocate(env: Env, user: Address, amount: i128) -> Result<(), Error> {
        let source = read_allocation_source(&env)?;
        source.require_auth();
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }

        let now = env.ledger().timestamp();
        let old_allocation = read_user_allocation(&env, &user);
        let new_allocation = old_allocation
            .checked_add(amount)
            .ok_or(Error::MathOverflow)?;
        let new_total = read_total_allocation(&env)
            .checked_add(amount)
            .ok_or(Error::MathOverflow)?;

        settle_user_accounts(&env, &user, old_allocation, new_allocation, now)?;
        write_allocations(&env, &user, new_allocation, new_total);

        env.events()
            .publish((symbol_short!("allocate"), user), amount);
        Ok(())
    }

    /// Decreases `user`'s allocation. Allocation source only. Banked
    /// dividends survive a full deallocation and remain harvestable.
    pub fn deallocate(env: Env, user: Address, amount: i128) -> Result<(), Error> {
        let source = read_allocation_source(&env)?;
        source.require_auth();
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }

        let old_allocation = read_user_allocation(&env, &user);
        if amount > old_allocation {
            return Err(Error::InsufficientStake);
        }
        let now = env.ledger().timestamp();
        let new_allocation = old_allocation - amount;
        let new_total = read_total_allocation(&env)
            .checked_sub(amount)
            .ok_or(Error::MathOverflow)?;

        settle_user_accounts(&env, &user, old_allocation, new_allocation, now)?;
        write_allocations(&env, &user, new_allocation, new_total);

        env.events()
            .publish((symbol_short!("dealloc"), user), amount);
        Ok(())
    }

    /// Pays out `user`'s accrued dividends for one token. Returns the amount
    /// actually transferred.
    pub fn harvest_dividends(env: Env, user: Address, reward_token: Address) -> Result<i128, Error> {
        user.require_auth();
        acquire_transfer_guard(&env)?;
        let now = env.ledger().timestamp();
        let cycle_start = advance_cycle_if_due(&env, now)?;
        let payout = harvest_token(&env, &user, &reward_token, cycle_start, now)?;
        release_transfer_guard(&env);
        Ok(payout)
    }

    /// Harvests every registered token for `user`. Returns the total paid
    /// across all tokens (amounts of different tokens, summed for reporting
    /// only).
    pub fn harvest_all_dividends(env: Env, user: Address) -> Result<i128, Error> {
        user.require_auth();
        acquire_transfer_guard(&env)?;
        let now = env.ledger().timestamp();
        let cycle_start = advance_cycle_if_due(&env, now)?;
        let mut total_paid = 0_i128;
        for reward_token in read_distributed_tokens(&env).iter() {
            let payout = harvest_token(&env, &user, &reward_token, cycle_start, now)?;
            total_paid = total_paid.checked_add(payout).ok_or(Error::MathOverflow)?;
        }
        release_transfer_guard(&env);
        Ok(total_paid)
    }

    /// Forces a settlement of one token without any payout. Permissionless.
    pub fn update_dividends_info(env: Env, reward_token: Address) -> Result<(), Error> {
        let mut info = read_dividends_info(&env, &reward_token)?;
        let now = env.ledger().timestamp();
        let cycle_start = advance_cycle_if_due(&env, now)?;
        settle_dividends_info(&env, &mut info, cycle_start, now)?;
        write_dividends_info(&env, &reward_token, &info);
        Ok(())
    }

    /// Settles every registered token. Permissionless.
    pub fn mass_update_dividends_info(env: Env) -> Result<(), Error> {
        let now = env.ledger().timestamp();
        let cycle_start = advance_cycle_if_due(&env, now)?;
        for reward_token in read_distributed_tokens(&env).iter() {
            let mut info = read_dividends_info(&env, &reward_token)?;
            settle_dividends_info(&env, &mut info, cycle_start, now)?;
            write_dividends_info(&env, &reward_token, &info);
        }
        Ok(())
    }

    /// Pulls `amount` of `reward_token` from the deposit handler into the
    /// token's pending slot. It enters a stream at a later cycle boundary.
    pub fn add_dividends_to_pending(
        env: Env,
        reward_token: Address,
        amount: i128,
    ) -> Result<(), Error> {
        let handler = read_deposit_handler(&env)?;
        handler.require_auth();
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        let mut info = read_dividends_info(&env, &reward_token)?;

        acquire_transfer_guard(&env)?;
        info.pending_amount = info
            .pending_amount
            .checked_add(amount)
            .ok_or(Error::MathOverflow)?;
        write_dividends_info(&env, &reward_token, &info);

        let contract = env.current_contract_address();
        token::Client::new(&env, &reward_token).transfer(&handler, &contract, &amount);
        release_transfer_guard(&env);

        env.events()
            .publish((symbol_short!("deposit"), reward_token), amount);
        Ok(())
    }

    /// Pulls `amount` directly into the active cycle's distribution slot and
    /// re-derives the streaming rate over the remaining cycle time. Requires
    /// a non-zero total allocation, otherwise the amount could never accrue.
    pub fn add_dividends_to_current_cycle(
        env: Env,
        reward_token: Address,
        amount: i128,
    ) -> Result<(), Error> {
        let handler = read_deposit_handler(&env)?;
        handler.require_auth();
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        if read_total_allocation(&env) == 0 {
            return Err(Error::InvalidState);
        }
        let mut info = read_dividends_info(&env, &reward_token)?;

        acquire_transfer_guard(&env)?;
        let now = env.ledger().timestamp();
        let cycle_start = advance_cycle_if_due(&env, now)?;
        settle_dividends_info(&env, &mut info, cycle_start, now)?;

        info.current_distribution_amount = info
            .current_distribution_amount
            .checked_add(amount)
            .ok_or(Error::MathOverflow)?;
        let cycle_end = cycle_start
            .checked_add(read_cycle_duration(&env)?)
            .ok_or(Error::MathOverflow)?;
        if now < cycle_end {
            let cap = info
                .current_distribution_amount
                .checked_mul(RATE_PRECISION)
                .ok_or(Error::MathOverflow)?;
            let remaining = cap
                .checked_sub(info.cycle_distributed_amount)
                .ok_or(Error::MathOverflow)?;
            info.dividends_amount_per_second = remaining
                .checked_div(i128::from(cycle_end - now))
                .ok_or(Error::MathOverflow)?;
        }
        write_dividends_info(&env, &reward_token, &info);

        let contract = env.current_contract_address();
        token::Client::new(&env, &reward_token).transfer(&handler, &contract, &amount);
        release_transfer_guard(&env);

        env.events()
            .publish((symbol_short!("depcycle"), reward_token), amount);
        Ok(())
    }

    /// Registers a new reward token, or re-enables a disabled one. Owner
    /// only. Fails with CapacityExceeded when the registry is full.
    pub fn enable_distributed_token(env: Env, reward_token: Address) -> Result<(), Error> {
        require_owner_auth(&env)?;
        match maybe_read_dividends_info(&env, &reward_token) {
            Some(mut info) => {
                if !info.distribution_disabled {
                    return Err(Error::InvalidState);
                }
                info.distribution_disabled = false;
                write_dividends_info(&env, &reward_token, &info);
            }
            None => {
                let mut tokens = read_distributed_tokens(&env);
                if tokens.len() >= MAX_DISTRIBUTED_TOKENS {
                    return Err(Error::CapacityExceeded);
                }
                let info = DividendsInfo {
                    current_distribution_amount: 0,
                    cycle_distributed_amount: 0,
                    pending_amount: 0,
                    distributed_amount: 0,
                    acc_dividends_per_share: 0,
                    dividends_amount_per_second: 0,
                    last_update_time: env.ledger().timestamp(),
                    cycle_dividends_percent: DEFAULT_CYCLE_DIVIDENDS_PERCENT,
                    distribution_disabled: false,
                };
                write_dividends_info(&env, &reward_token, &info);
                tokens.push_back(reward_token.clone());
                env.storage()
                    .instance()
                    .set(&DataKey::DistributedTokens, &tokens);
            }
        }
        env.events()
            .publish((symbol_short!("enable"), reward_token), ());
        Ok(())
    }

    /// Stops committing new funds for this token from the next cycle
    /// boundary on. The currently streaming cycle is unaffected. Owner only.
    pub fn disable_distributed_token(env: Env, reward_token: Address) -> Result<(), Error> {
        require_owner_auth(&env)?;
        let mut info = read_dividends_info(&env, &reward_token)?;
        if info.distribution_disabled {
            return Err(Error::InvalidState);
        }
        info.distribution_disabled = true;
        write_dividends_info(&env, &reward_token, &info);
        env.events()
            .publish((symbol_short!("disable"), reward_token), ());
        Ok(())
    }

    /// Erases a disabled, fully drained token from the registry. Owner only.
    pub fn remove_distributed_token(env: Env, reward_token: Address) -> Result<(), Error> {
        require_owner_auth(&env)?;
        let info = read_dividends_info(&env, &reward_token)?;
        if !info.distribution_disabled || info.current_distribution_amount != 0 {
            return Err(Error::InvalidState);
        }
        let mut tokens = read_distributed_tokens(&env);
        if let Some(index) = tokens.first_index_of(&reward_token) {
            tokens.remove(index);
            env.storage()
                .instance()
                .set(&DataKey::DistributedTokens, &tokens);
        }
        env.storage()
            .instance()
            .remove(&DataKey::DividendsInfo(reward_token.clone()));
        env.events()
            .publish((symbol_short!("remove"), reward_token), ());
        Ok(())
    }

    /// Adjusts the fraction of the pending slot committed at each cycle
    /// boundary. Takes effect at the next boundary. Owner only.
    pub fn update_cycle_dividends_percent(
        env: Env,
        reward_token: Address,
        percent: u32,
    ) -> Result<(), Error> {
        require_owner_auth(&env)?;
        if percent < MIN_CYCLE_DIVIDENDS_PERCENT || percent > MAX_CYCLE_DIVIDENDS_PERCENT {
            return Err(Error::OutOfBounds);
        }
        let mut info = read_dividends_info(&env, &reward_token)?;
        let old_percent = info.cycle_dividends_percent;
        info.cycle_dividends_percent = percent;
        write_dividends_info(&env, &reward_token, &info);
        env.events().publish(
            (symbol_short!("pctupdt"), reward_token),
            (old_percent, percent),
        );
        Ok(())
    }

    /// Sweeps the contract's entire balance of `token` to the owner. Escape
    /// hatch only; distribution accounting is deliberately left untouched.
    pub fn emergency_withdraw(env: Env, token_address: Address) -> Result<i128, Error> {
        let owner = require_owner_auth(&env)?;
        acquire_transfer_guard(&env)?;
        let contract = env.current_contract_address();
        let client = token::Client::new(&env, &token_address);
        let balance = client.balance(&contract);
        if balance <= 0 {
            return Err(Error::InvalidState);
        }
        client.transfer(&contract, &owner, &balance);
        release_transfer_guard(&env);
        Ok(balance)
    }

    /// Distribution state for one token, settled to the current timestamp
    /// without persisting the settlement.
    pub fn get_dividends_info(env: Env, reward_token: Address) -> Result<DividendsInfo, Error> {
        preview_dividends_info(&env, &reward_token)
    }

    /// Amount `user` could harvest for `reward_token` right now.
    pub fn pending_dividends_amount(
        env: Env,
        reward_token: Address,
        user: Address,
    ) -> Result<i128, Error> {
        let info = preview_dividends_info(&env, &reward_token)?;
        let allocation = read_user_allocation(&env, &user);
        let user_info = read_user_info(&env, &reward_token, &user);
        let debt_basis = mul_div(allocation, info.acc_dividends_per_share, ACC_DIVIDENDS_PRECISION)?;
        let accrued = debt_basis
            .checked_sub(user_info.reward_debt)
            .ok_or(Error::MathOverflow)?
            .max(0);
        user_info
            .pending_dividends
            .checked_add(accrued)
            .ok_or(Error::MathOverflow)
    }

    pub fn users_allocation(env: Env, user: Address) -> i128 {
        read_user_allocation(&env, &user)
    }

    pub fn total_allocation(env: Env) -> i128 {
        read_total_allocation(&env)
    }

    pub fn distributed_tokens(env: Env) -> Vec<Address> {
        read_distributed_tokens(&env)
    }

    pub fn current_cycle_start_time(env: Env) -> Result<u64, Error> {
        read_cycle_start_time(&env)
    }

    pub fn next_cycle_start_time(env: Env) -> Result<u64, Error> {
        read_cycle_start_time(&env)?
            .checked_add(read_cycle_duration(&env)?)
            .ok_or(Error::MathOverflow)
    }
}

mod test;
mod test_allocation;
mod test_harvest;
mod test_admin;
