use payflow::application::engine::{CreatePaymentRequest, EngineConfig, PaymentEngine};
use payflow::application::registry::ProviderRegistry;
use payflow::domain::money::Money;
use payflow::domain::ports::{Commit, PaymentStoreRef, ProviderRef};
use payflow::domain::transaction::{Details, PaymentMethod, PaymentStatus, Transaction};
use payflow::infrastructure::in_memory::InMemoryStore;
use payflow::infrastructure::providers::MockProvider;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let store: PaymentStoreRef = Arc::new(InMemoryStore::new());
    let provider: ProviderRef = Arc::new(MockProvider::new());

    let tx = Transaction::new(
        "m1",
        Money::new(dec!(100.0), "USD").unwrap(),
        PaymentMethod::Mock,
        provider.name(),
        None,
        Details::new(),
    );
    let id = tx.id;

    // Verify Send + Sync by spawning tasks
    let store_handle = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store.commit(Commit::transaction(tx)).await.unwrap();
            store.find_transaction(id).await.unwrap().unwrap()
        })
    };

    let provider_handle = {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            let money = Money::new(dec!(5), "EUR").unwrap();
            provider
                .create_payment_intent(&money, &Details::new(), &Details::new())
                .await
        })
    };

    assert_eq!(store_handle.await.unwrap().id, id);
    assert!(provider_handle.await.unwrap().success());
}

#[tokio::test]
async fn test_engine_use_cases_run_on_spawned_tasks() {
    let engine = Arc::new(
        PaymentEngine::new(
            Arc::new(InMemoryStore::new()),
            ProviderRegistry::new().with(Arc::new(MockProvider::new())),
            EngineConfig::default(),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let outcome = engine
                    .create_payment_intent(
                        CreatePaymentRequest::new("m1", dec!(10), "USD")
                            .idempotency_key(format!("order-{}", i)),
                    )
                    .await?;
                let payer = Details::from([("payer_id".to_string(), "PAYER".to_string())]);
                engine.confirm_payment(outcome.transaction.id, payer).await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.transaction.status, PaymentStatus::Completed);
    }

    let balance = engine.merchant_balance("m1", "USD").await.unwrap();
    assert_eq!(balance.available.0, dec!(100));
    assert_eq!(balance.pending.0, dec!(0));
}
