mod support;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use vault_sync::contract::IDeFiAgentVault;
use vault_sync::types::VaultField;

use support::{agent, ether, session_with, test_config, token, user, APY_BPS};

#[tokio::test]
async fn refresh_reads_every_global_field() {
    let (chain, session, _notifications) = session_with(Some(user()), test_config());
    chain.seed_deposit(user(), ether(3));

    let state = session.cache().refresh().await;
    assert_eq!(state.total_deposited, Some(ether(3)));
    assert_eq!(state.total_yield_harvested, Some(U256::ZERO));
    assert_eq!(state.total_fees_collected, Some(U256::ZERO));
    assert_eq!(state.estimated_apy_bps, Some(U256::from(APY_BPS)));
    assert_eq!(state.owner, Some(support::owner()));
    assert!(state.stale.is_empty());
    assert_eq!(state.estimated_apy_percent(), 12.5);
}

#[tokio::test]
async fn failed_field_keeps_previous_value_without_touching_others() {
    let (chain, session, _notifications) = session_with(Some(user()), test_config());
    chain.seed_deposit(user(), ether(1));
    let before = session.cache().refresh().await;

    chain.fail_reads::<IDeFiAgentVault::totalYieldHarvestedCall>();
    chain.seed_deposit(user(), ether(1));
    let after = session.cache().refresh().await;

    assert_eq!(after.total_deposited, Some(ether(2)));
    assert_eq!(after.total_yield_harvested, before.total_yield_harvested);
    assert_eq!(after.owner, before.owner);
    assert_eq!(after.stale, vec![VaultField::TotalYieldHarvested]);

    chain.restore_reads();
    let recovered = session.cache().refresh().await;
    assert!(recovered.stale.is_empty());
}

#[tokio::test]
async fn field_never_read_successfully_stays_unknown() {
    let (chain, session, _notifications) = session_with(None, test_config());
    chain.fail_reads::<IDeFiAgentVault::ownerCall>();

    let state = session.cache().refresh().await;
    assert_eq!(state.owner, None);
    assert!(state.is_stale(VaultField::Owner));
    assert_eq!(state.total_deposited, Some(U256::ZERO));
}

#[tokio::test]
async fn superseded_refresh_does_not_regress_snapshot() {
    let (chain, session, _notifications) = session_with(None, test_config());
    chain.seed_deposit(user(), ether(1));
    chain.set_read_delay(Duration::from_millis(200));

    let cache = Arc::clone(session.cache());
    let slow = tokio::spawn(async move { cache.refresh().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    chain.set_read_delay(Duration::ZERO);
    chain.seed_deposit(user(), ether(1));
    let fast = session.cache().refresh().await;
    assert_eq!(fast.total_deposited, Some(ether(2)));

    let slow = slow.await.expect("slow refresh");
    assert_eq!(slow.total_deposited, Some(ether(2)));
    assert_eq!(session.cache().vault_state().total_deposited, Some(ether(2)));
}

#[tokio::test]
async fn user_refresh_tracks_eth_and_token_positions() {
    let (chain, session, _notifications) = session_with(Some(user()), test_config());
    chain.seed_deposit(user(), ether(2));

    let position = session.cache().refresh_user(Some(user())).await;
    assert_eq!(position.account, Some(user()));
    assert_eq!(position.eth_deposit, Some(ether(2)));
    assert_eq!(position.token_deposits.get(&token()), Some(&Some(U256::ZERO)));
    assert!(!position.stale);
}

#[tokio::test]
async fn absent_account_yields_empty_position() {
    let (chain, session, _notifications) = session_with(Some(user()), test_config());
    chain.seed_deposit(user(), ether(2));
    session.cache().refresh_user(Some(user())).await;

    let reads = chain.read_count();
    let position = session.cache().refresh_user(None).await;
    assert!(!position.is_connected());
    assert_eq!(position.eth_deposit, None);
    assert_eq!(chain.read_count(), reads);
    assert!(!session.cache().user_position().is_connected());
}

#[tokio::test]
async fn switching_accounts_never_reuses_previous_values() {
    let (chain, session, _notifications) = session_with(Some(user()), test_config());
    chain.seed_deposit(user(), ether(5));
    session.cache().refresh_user(Some(user())).await;

    chain.fail_reads::<IDeFiAgentVault::userDepositETHCall>();
    let other = session.cache().refresh_user(Some(agent())).await;
    assert_eq!(other.account, Some(agent()));
    assert_eq!(other.eth_deposit, None);
    assert!(other.stale);
}

#[tokio::test]
async fn agent_status_is_memoized_per_address() {
    let (chain, session, _notifications) = session_with(None, test_config());
    chain.add_agent(agent());

    assert!(session.cache().get_agent_status(agent()).await.unwrap());
    let reads = chain.read_count();
    assert!(session.cache().get_agent_status(agent()).await.unwrap());
    assert_eq!(chain.read_count(), reads);

    assert!(!session.cache().get_agent_status(user()).await.unwrap());
    assert_eq!(chain.read_count(), reads + 1);
}

#[tokio::test]
async fn failed_agent_lookup_is_not_memoized() {
    let (chain, session, _notifications) = session_with(None, test_config());
    chain.add_agent(agent());
    chain.fail_reads::<IDeFiAgentVault::isAgentCall>();

    let err = session
        .cache()
        .get_agent_status(agent())
        .await
        .expect_err("lookup fails");
    assert_eq!(err.call, "isAgent");

    chain.restore_reads();
    assert!(session.cache().get_agent_status(agent()).await.unwrap());
}

#[tokio::test]
async fn observers_see_every_committed_refresh() {
    let (chain, session, _notifications) = session_with(Some(user()), test_config());
    let mut updates = session.cache().subscribe();
    let initial = updates.borrow_and_update().version;

    chain.seed_deposit(user(), ether(1));
    session.cache().refresh().await;
    assert!(updates.has_changed().unwrap());
    let snapshot = updates.borrow_and_update().clone();
    assert!(snapshot.version > initial);
    assert_eq!(snapshot.vault.total_deposited, Some(ether(1)));
}
