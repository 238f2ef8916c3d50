mod common;

use common::TestApp;
use rust_decimal_macros::dec;
use starshop_api::errors::ServiceError;
use starshop_api::services::conversation::OrderDraft;
use starshop_api::services::pricing::PaymentRail;
use starshop_api::services::reconciliation::ReconcileOutcome;
use starshop_api::services::settings::keys;

async fn fulfill_wallet_order(app: &TestApp, user_id: i64, quantity: i64) {
    app.services
        .orders
        .open_order(
            user_id,
            OrderDraft {
                recipient: format!("recipient{user_id}"),
                quantity,
                rail: PaymentRail::OnChainWallet,
            },
        )
        .await
        .expect("failed to open order");
    let order = app
        .services
        .orders
        .pending_order(user_id)
        .await
        .unwrap()
        .unwrap();
    app.chain.push_transfer(
        order.memo.as_deref().unwrap(),
        order.expected_ton.unwrap(),
    );
    let outcome = app.services.reconciliation.reconcile(user_id).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::PaidAndFulfilled);
}

#[tokio::test]
async fn a_referred_purchase_credits_the_referrer_once() {
    let app = TestApp::new().await;
    app.register_user(100, "referrer", None).await;
    app.register_user(200, "buyer", Some(100)).await;

    // 100 stars on the wallet rail at the default settings: 1.782 USD,
    // 0.3564 TON, 5% referral bonus on the paid amount
    fulfill_wallet_order(&app, 200, 100).await;

    let history = app.services.ledger.bonus_history(100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].referred_id, 200);
    assert_eq!(history[0].currency, "TON");
    assert_eq!(history[0].amount, dec!(0.3564) * dec!(5) / dec!(100));

    let referrer = app.services.users.get(100).await.unwrap();
    assert_eq!(referrer.referral_bonus, history[0].amount);

    // the referrer is told about the grant, exactly once
    let notices: Vec<String> = app
        .notifier
        .messages_for(100)
        .into_iter()
        .filter(|m| m.contains("referral bonus"))
        .collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("TON"));
}

#[tokio::test]
async fn purchases_without_a_referrer_grant_no_bonus() {
    let app = TestApp::new().await;
    app.register_user(101, "loner", None).await;
    fulfill_wallet_order(&app, 101, 50).await;

    let bonuses = app.services.ledger.bonus_history(101).await.unwrap();
    assert!(bonuses.is_empty());
}

#[tokio::test]
async fn self_referrals_are_ignored_at_registration() {
    let app = TestApp::new().await;
    app.register_user(102, "selfie", Some(102)).await;
    let user = app.services.users.get(102).await.unwrap();
    assert_eq!(user.referrer_id, None);
}

#[tokio::test]
async fn the_referrer_binding_is_permanent() {
    let app = TestApp::new().await;
    app.register_user(103, "first", None).await;
    app.register_user(104, "second", None).await;
    app.register_user(105, "referred", Some(103)).await;

    // re-registering with a different referrer changes nothing
    app.register_user(105, "referred", Some(104)).await;
    let user = app.services.users.get(105).await.unwrap();
    assert_eq!(user.referrer_id, Some(103));
}

#[tokio::test]
async fn leaderboards_rank_referrers_and_purchasers() {
    let app = TestApp::new().await;
    app.register_user(300, "anna", None).await;
    app.register_user(301, "ben", None).await;
    app.register_user(302, "r1", Some(300)).await;
    app.register_user(303, "r2", Some(300)).await;
    app.register_user(304, "r3", Some(301)).await;

    let referrers = app.services.ledger.top_referrers_by_count(10).await.unwrap();
    assert_eq!(referrers.len(), 2);
    assert_eq!(referrers[0].user_id, 300);
    assert_eq!(referrers[0].referrals, 2);
    assert_eq!(referrers[1].user_id, 301);

    fulfill_wallet_order(&app, 302, 50).await;
    fulfill_wallet_order(&app, 303, 200).await;

    let purchasers = app
        .services
        .ledger
        .top_purchasers_by_volume(10)
        .await
        .unwrap();
    assert_eq!(purchasers.len(), 2);
    assert_eq!(purchasers[0].user_id, 303);
    assert_eq!(purchasers[0].stars_bought, 200);
    assert_eq!(purchasers[1].user_id, 302);

    let top_one = app.services.ledger.top_referrers_by_count(1).await.unwrap();
    assert_eq!(top_one.len(), 1);
    assert_eq!(top_one[0].user_id, 300);
}

#[tokio::test]
async fn profit_accumulates_and_resets_without_touching_sold_counters() {
    let app = TestApp::new().await;
    app.services.settings.set(keys::ADMIN_IDS, "900").await.unwrap();
    app.register_user(400, "buyer", None).await;

    fulfill_wallet_order(&app, 400, 100).await;
    let stats = app.services.ledger.stats().await.unwrap();
    assert_eq!(stats.total_sold, 100);
    // profit is the markup on a $1.62 base at 10%
    assert_eq!(stats.total_profit_usd, dec!(0.162));
    assert!(stats.total_profit_ton > dec!(0));

    app.services.ledger.reset_profit_counters(900).await.unwrap();
    let stats = app.services.ledger.stats().await.unwrap();
    assert_eq!(stats.total_sold, 100);
    assert_eq!(stats.total_profit_usd, dec!(0));
    assert_eq!(stats.total_profit_ton, dec!(0));
}

#[tokio::test]
async fn non_admins_cannot_reset_or_change_settings() {
    let app = TestApp::new().await;
    app.services.settings.set(keys::ADMIN_IDS, "900,901").await.unwrap();

    let err = app
        .services
        .ledger
        .reset_profit_counters(777)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = app
        .services
        .settings
        .set_for_admin(777, keys::MARKUP_PERCENT, "15")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    app.services
        .settings
        .set_for_admin(901, keys::MARKUP_PERCENT, "15")
        .await
        .unwrap();
    assert_eq!(
        app.services
            .settings
            .get_decimal(keys::MARKUP_PERCENT, dec!(10))
            .await
            .unwrap(),
        dec!(15)
    );
}

#[tokio::test]
async fn changed_settings_apply_to_the_next_quote() {
    let app = TestApp::new().await;
    app.register_user(500, "buyer", None).await;

    app.services.settings.set(keys::MARKUP_PERCENT, "20").await.unwrap();
    let response = app
        .services
        .orders
        .open_order(
            500,
            OrderDraft {
                recipient: "gift".to_string(),
                quantity: 50,
                rail: PaymentRail::OnChainWallet,
            },
        )
        .await
        .unwrap();
    // 0.81 base with 20% markup, no wallet commission
    assert_eq!(response.final_usd, dec!(0.972));
}
