use super::*;
use crate::catalog::{AddOnCatalog, CollaboratorError, SeasonalRates, StaticCatalog, TaxRates};
use crate::journal::{MemoryJournal, WalJournal};
use crate::limits::{MAX_BLACKOUT_SPAN_MS, MAX_INTERVALS_PER_ITEM};
use crate::money::Money;
use crate::pricing::{InsurancePolicy, PricingConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

const T0: Ms = 1_767_225_600_000; // 2026-01-01T00:00:00Z
const H: Ms = HOUR_MS;

fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::from_json(include_str!("../../config/catalog.example.json")).unwrap())
}

fn engine_with(journal: Arc<dyn Journal>, collaborators: Collaborators, config: EngineConfig) -> Engine {
    Engine::new(journal, collaborators, PricingConfig::default(), config)
}

fn mem_engine() -> (Engine, Arc<MemoryJournal>) {
    let journal = Arc::new(MemoryJournal::new());
    let engine = engine_with(
        journal.clone(),
        Collaborators::from_catalog(catalog()),
        EngineConfig::default(),
    );
    (engine, journal)
}

fn req(item: &str, start: Ms, end: Ms, tier: Tier) -> PricingRequest {
    PricingRequest {
        item_id: item.into(),
        range: Span::new(start, end),
        tier,
        add_ons: vec![],
        pickup_location: "miami".into(),
        dropoff_location: "miami".into(),
    }
}

fn day(item: &str, n: Ms) -> PricingRequest {
    req(item, T0 + n * DAY_MS, T0 + (n + 1) * DAY_MS, Tier::Standard)
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("rental_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

// ── Reserve ──────────────────────────────────────────────

#[tokio::test]
async fn reserve_prices_premium_26_hours() {
    let (engine, journal) = mem_engine();
    let booking = engine
        .reserve(req("ferrari-sf90", T0, T0 + 26 * H, Tier::Premium), "cust-1")
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::PendingPayment);
    assert_eq!(booking.customer_id, "cust-1");
    assert_eq!(booking.price.duration_days, 2);
    assert_eq!(booking.price.subtotal, Money::from_cents(390_000));
    assert_eq!(booking.price.service_fee, Money::from_cents(19_500));
    assert_eq!(booking.price.taxes, Money::from_cents(32_760));
    assert_eq!(booking.price.total, Money::from_cents(442_260));

    let hits = engine.calendar.query_overlaps("ferrari-sf90", &booking.range).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, booking.id);
    assert_eq!(engine.get_booking(booking.id).unwrap(), booking);
    assert_eq!(journal.events().await, vec![Event::BookingReserved { booking }]);
}

#[tokio::test]
async fn overlapping_reserve_reports_conflicts() {
    let (engine, _) = mem_engine();
    let first = engine.reserve(day("ferrari-sf90", 0), "cust-1").await.unwrap();

    let err = engine
        .reserve(req("ferrari-sf90", T0 + 12 * H, T0 + 36 * H, Tier::Elite), "cust-2")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Conflict {
            item_id: "ferrari-sf90".into(),
            conflicts: vec![first.range],
        }
    );
    assert_eq!(engine.bookings_for_item("ferrari-sf90").len(), 1);
}

#[tokio::test]
async fn adjacent_ranges_both_reserve() {
    let (engine, _) = mem_engine();
    assert_ok!(engine.reserve(day("ferrari-sf90", 0), "a").await);
    assert_ok!(engine.reserve(day("ferrari-sf90", 1), "b").await);
    let list = engine.bookings_for_item("ferrari-sf90");
    assert_eq!(list.len(), 2);
    assert!(list[0].range.start < list[1].range.start);
}

#[tokio::test]
async fn item_buffer_override_boundary() {
    // rolls-ghost carries a two-hour turnaround.
    let (engine, _) = mem_engine();
    let first = engine.reserve(day("rolls-ghost", 0), "a").await.unwrap();
    let boundary = first.range.end + 2 * H;

    let short = req("rolls-ghost", boundary - SECOND_MS, boundary - SECOND_MS + DAY_MS, Tier::Standard);
    assert!(matches!(
        engine.reserve(short, "b").await,
        Err(EngineError::Conflict { .. })
    ));

    let exact = req("rolls-ghost", boundary, boundary + DAY_MS, Tier::Standard);
    assert_ok!(engine.reserve(exact, "b").await);
}

#[tokio::test]
async fn default_buffer_applies_without_override() {
    let engine = engine_with(
        Arc::new(MemoryJournal::new()),
        Collaborators::from_catalog(catalog()),
        EngineConfig {
            buffer_hours: 3,
            ..EngineConfig::default()
        },
    );
    let first = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();
    let too_soon = req("ferrari-sf90", first.range.end + 2 * H, first.range.end + 8 * H, Tier::Standard);
    assert_err!(engine.reserve(too_soon, "b").await);
    let ok = req("ferrari-sf90", first.range.end + 3 * H, first.range.end + 8 * H, Tier::Standard);
    assert_ok!(engine.reserve(ok, "b").await);
}

#[tokio::test]
async fn reserve_validation_errors() {
    let (engine, _) = mem_engine();

    let err = engine.reserve(day("bugatti-chiron", 0), "a").await.unwrap_err();
    assert_eq!(err, EngineError::ItemNotFound("bugatti-chiron".into()));

    let mut inverted = day("ferrari-sf90", 0);
    inverted.range = Span { start: T0 + DAY_MS, end: T0 };
    assert!(matches!(engine.reserve(inverted, "a").await, Err(EngineError::InvalidRange(_))));

    // villa-aurora needs three days.
    let err = engine.reserve(day("villa-aurora", 0), "a").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRange(_)));

    let mut elsewhere = day("ferrari-sf90", 0);
    elsewhere.pickup_location = "monaco".into();
    let err = engine.reserve(elsewhere, "a").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "pickup_location", .. }));

    let mut addon = day("ferrari-sf90", 0);
    addon.add_ons.push(AddOnLine { addon_id: "jetpack".into(), quantity: 1 });
    let err = engine.reserve(addon, "a").await.unwrap_err();
    assert_eq!(err, EngineError::UnknownAddOn("jetpack".into()));
    assert!(err.is_retryable());

    let mut zero_qty = day("ferrari-sf90", 0);
    zero_qty.add_ons.push(AddOnLine { addon_id: "chauffeur".into(), quantity: 0 });
    assert!(matches!(
        engine.reserve(zero_qty, "a").await,
        Err(EngineError::Validation { field: "add_ons", .. })
    ));

    let err = engine.reserve(day("ferrari-sf90", 0), "  ").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "customer_id", .. }));

    // Nothing leaked onto the calendar.
    assert!(engine
        .calendar
        .query_overlaps("ferrari-sf90", &Span::new(T0, T0 + 10 * DAY_MS))
        .await
        .is_empty());
}

#[tokio::test]
async fn add_ons_and_deposit_flow_into_booking() {
    let pricing = PricingConfig {
        insurance: InsurancePolicy::Daily { amount: Money::from_cents(5_000) },
        deposits: BTreeMap::from([("azimut-grande".to_string(), Money::from_cents(2_500_000))]),
        ..PricingConfig::default()
    };
    let engine = Engine::new(
        Arc::new(MemoryJournal::new()),
        Collaborators::from_catalog(catalog()),
        pricing,
        EngineConfig::default(),
    );
    let mut request = req("azimut-grande", T0, T0 + 8 * H, Tier::Standard);
    request.add_ons = vec![
        AddOnLine { addon_id: "captain".into(), quantity: 1 },
        AddOnLine { addon_id: "champagne".into(), quantity: 2 },
        AddOnLine { addon_id: "champagne".into(), quantity: 1 },
    ];
    let booking = engine.reserve(request, "cust-9").await.unwrap();
    let p = &booking.price;

    assert_eq!(p.subtotal, Money::from_cents(900_000));
    assert_eq!(p.add_ons_total, Money::from_cents(120_000 + 3 * 4_550));
    assert_eq!(p.service_fee, Money::from_cents(45_000));
    assert_eq!(p.insurance, Money::from_cents(5_000));
    // 8% of (9000.00 + 1336.50 + 450.00) = 862.92
    assert_eq!(p.taxes, Money::from_cents(86_292));
    assert_eq!(p.security_deposit, Money::from_cents(2_500_000));
    assert_eq!(p.itemized_sum(), Some(p.total));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn two_concurrent_overlapping_reserves_one_wins() {
    let (engine, _) = mem_engine();
    let engine = Arc::new(engine);

    let a = {
        let e = engine.clone();
        tokio::spawn(async move { e.reserve(req("gulfstream-g650", T0, T0 + 6 * H, Tier::Elite), "a").await })
    };
    let b = {
        let e = engine.clone();
        tokio::spawn(async move { e.reserve(req("gulfstream-g650", T0 + 3 * H, T0 + 9 * H, Tier::Elite), "b").await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, EngineError::Conflict { .. }));
    assert_eq!(engine.bookings_for_item("gulfstream-g650").len(), 1);
}

#[tokio::test]
async fn many_concurrent_reserves_never_double_book() {
    let (engine, _) = mem_engine();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for n in 0..64 {
        let e = engine.clone();
        // Staggered, heavily overlapping two-day windows.
        let start = T0 + (n % 8) * 6 * H;
        handles.push(tokio::spawn(async move {
            e.reserve(req("ferrari-sf90", start, start + 2 * DAY_MS, Tier::Standard), &format!("c{n}"))
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(ok >= 1);

    let committed = engine.bookings_for_item("ferrari-sf90");
    assert_eq!(committed.len(), ok);
    for pair in committed.windows(2) {
        assert!(!pair[0].range.overlaps(&pair[1].range), "double booked: {:?}", pair);
    }
}

#[tokio::test]
async fn different_items_reserve_in_parallel() {
    let (engine, _) = mem_engine();
    let engine = Arc::new(engine);
    let items = ["ferrari-sf90", "rolls-ghost", "azimut-grande", "gulfstream-g650"];

    let mut handles = Vec::new();
    for item in items {
        let e = engine.clone();
        handles.push(tokio::spawn(async move { e.reserve(day(item, 0), "same-customer").await }));
    }
    for h in handles {
        assert_ok!(h.await.unwrap());
    }
}

// ── Status machine ───────────────────────────────────────

#[tokio::test]
async fn cancel_is_idempotent_and_frees_range() {
    let (engine, journal) = mem_engine();
    let booking = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();

    let cancelled = engine.cancel(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.updated_at >= booking.updated_at);

    let again = engine.cancel(booking.id).await.unwrap();
    assert_eq!(again, cancelled);
    // Second cancel wrote nothing.
    assert_eq!(journal.events().await.len(), 2);

    assert_ok!(engine.reserve(day("ferrari-sf90", 0), "b").await);
}

#[tokio::test]
async fn cancel_unknown_booking() {
    let (engine, _) = mem_engine();
    let id = Ulid::new();
    assert_eq!(engine.cancel(id).await, Err(EngineError::BookingNotFound(id)));
}

#[tokio::test]
async fn expire_only_touches_unpaid() {
    let (engine, _) = mem_engine();
    let unpaid = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();
    let paid = engine.reserve(day("ferrari-sf90", 2), "b").await.unwrap();
    engine.confirm(paid.id).await.unwrap();

    assert_eq!(engine.expire(unpaid.id).await.unwrap().status, BookingStatus::Cancelled);
    // Already cancelled: no-op.
    assert_ok!(engine.expire(unpaid.id).await);

    let err = engine.expire(paid.id).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            id: paid.id,
            from: BookingStatus::Confirmed,
            to: BookingStatus::Cancelled,
        }
    );
    // Still on the calendar.
    assert_eq!(engine.calendar.query_overlaps("ferrari-sf90", &paid.range).await.len(), 1);
}

#[tokio::test]
async fn confirm_complete_lifecycle() {
    let (engine, _) = mem_engine();
    let b = engine.reserve(day("azimut-grande", 0), "a").await.unwrap();

    assert!(matches!(
        engine.complete(b.id).await,
        Err(EngineError::InvalidTransition { from: BookingStatus::PendingPayment, .. })
    ));
    assert_eq!(engine.confirm(b.id).await.unwrap().status, BookingStatus::Confirmed);
    assert_eq!(engine.confirm(b.id).await.unwrap().status, BookingStatus::Confirmed);
    assert_eq!(engine.complete(b.id).await.unwrap().status, BookingStatus::Completed);
    assert_eq!(engine.complete(b.id).await.unwrap().status, BookingStatus::Completed);

    assert_err!(engine.cancel(b.id).await);
    assert_err!(engine.confirm(b.id).await);
    // Completed rentals keep their range.
    assert_err!(engine.reserve(day("azimut-grande", 0), "b").await);
}

#[test]
fn transition_table() {
    use BookingStatus::*;
    let id = Ulid::new();
    let cases = [
        (Transition::Confirm, PendingPayment, Some(true)),
        (Transition::Confirm, Confirmed, Some(false)),
        (Transition::Confirm, Completed, None),
        (Transition::Confirm, Cancelled, None),
        (Transition::Complete, PendingPayment, None),
        (Transition::Complete, Confirmed, Some(true)),
        (Transition::Complete, Completed, Some(false)),
        (Transition::Complete, Cancelled, None),
        (Transition::Cancel, PendingPayment, Some(true)),
        (Transition::Cancel, Confirmed, Some(true)),
        (Transition::Cancel, Completed, None),
        (Transition::Cancel, Cancelled, Some(false)),
        (Transition::Expire, PendingPayment, Some(true)),
        (Transition::Expire, Confirmed, None),
        (Transition::Expire, Completed, None),
        (Transition::Expire, Cancelled, Some(false)),
    ];
    for (t, from, expected) in cases {
        assert_eq!(t.check(id, from).ok(), expected, "{t:?} from {from}");
    }
}

#[tokio::test]
async fn stale_pending_respects_window() {
    let (engine, _) = mem_engine();
    let a = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();
    let b = engine.reserve(day("ferrari-sf90", 2), "b").await.unwrap();
    engine.confirm(b.id).await.unwrap();

    let window = 15 * 60 * SECOND_MS;
    assert!(engine.stale_pending(a.created_at + window - 1, window).is_empty());
    assert_eq!(engine.stale_pending(a.created_at + window, window), vec![a.id]);
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn journal_failure_rolls_back_calendar() {
    let (engine, journal) = mem_engine();
    journal.fail_appends(true);

    let err = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap_err();
    assert!(matches!(err, EngineError::Journal(_)));
    assert_eq!(err.code(), "internal");
    assert!(engine
        .calendar
        .query_overlaps("ferrari-sf90", &Span::new(T0, T0 + DAY_MS))
        .await
        .is_empty());
    assert!(engine.bookings_for_item("ferrari-sf90").is_empty());

    journal.fail_appends(false);
    assert_ok!(engine.reserve(day("ferrari-sf90", 0), "a").await);
}

#[tokio::test]
async fn failed_cancel_keeps_booking() {
    let (engine, journal) = mem_engine();
    let b = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();
    journal.fail_appends(true);
    assert_err!(engine.cancel(b.id).await);
    assert_eq!(engine.get_booking(b.id).unwrap().status, BookingStatus::PendingPayment);
    assert_eq!(engine.calendar.query_overlaps("ferrari-sf90", &b.range).await.len(), 1);
}

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (kept, dropped, blackout) = {
        let (journal, events) = WalJournal::open(&path).unwrap();
        assert!(events.is_empty());
        let engine = engine_with(Arc::new(journal), Collaborators::from_catalog(catalog()), EngineConfig::default());
        let kept = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();
        let dropped = engine.reserve(day("ferrari-sf90", 2), "b").await.unwrap();
        engine.confirm(kept.id).await.unwrap();
        engine.cancel(dropped.id).await.unwrap();
        let blackout = engine
            .add_blackout("ferrari-sf90", Span::new(T0 + 5 * DAY_MS, T0 + 6 * DAY_MS))
            .await
            .unwrap();
        (kept, dropped, blackout)
    };

    let (journal, events) = WalJournal::open(&path).unwrap();
    assert_eq!(events.len(), 5);
    let engine = Engine::restore(
        &events,
        Arc::new(journal),
        Collaborators::from_catalog(catalog()),
        PricingConfig::default(),
        EngineConfig::default(),
    )
    .unwrap();

    assert_eq!(engine.get_booking(kept.id).unwrap().status, BookingStatus::Confirmed);
    assert_eq!(engine.get_booking(dropped.id).unwrap().status, BookingStatus::Cancelled);
    assert_eq!(engine.get_booking(kept.id).unwrap().price, kept.price);

    let hits = engine
        .calendar
        .query_overlaps("ferrari-sf90", &Span::new(T0, T0 + 10 * DAY_MS))
        .await;
    let ids: Vec<Ulid> = hits.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![kept.id, blackout]);

    // The freed day is reservable after restart, the kept one is not.
    assert_ok!(engine.reserve(day("ferrari-sf90", 2), "c").await);
    assert_err!(engine.reserve(day("ferrari-sf90", 0), "c").await);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn compaction_survives_restart() {
    let path = test_wal_path("compact_restart.wal");
    let (kept, blackout) = {
        let (journal, _) = WalJournal::open(&path).unwrap();
        let engine = engine_with(Arc::new(journal), Collaborators::from_catalog(catalog()), EngineConfig::default());
        let kept = engine.reserve(day("rolls-ghost", 0), "a").await.unwrap();
        for n in 0..10 {
            let b = engine.reserve(day("rolls-ghost", 2 + n * 2), "churn").await.unwrap();
            engine.cancel(b.id).await.unwrap();
        }
        let temp = engine.add_blackout("rolls-ghost", Span::new(T0 + 40 * DAY_MS, T0 + 41 * DAY_MS)).await.unwrap();
        engine.remove_blackout(temp).await.unwrap();
        let blackout = engine
            .add_blackout("rolls-ghost", Span::new(T0 + 50 * DAY_MS, T0 + 51 * DAY_MS))
            .await
            .unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        assert_eq!(engine.journal_appends_since_compact().await, 24);
        engine.compact_journal().await.unwrap();
        assert_eq!(engine.journal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal ({after}) should be smaller than {before}");
        (kept, blackout)
    };

    let (journal, events) = WalJournal::open(&path).unwrap();
    // One blackout plus eleven bookings (ten cancelled).
    assert_eq!(events.len(), 12);
    let engine = Engine::restore(
        &events,
        Arc::new(journal),
        Collaborators::from_catalog(catalog()),
        PricingConfig::default(),
        EngineConfig::default(),
    )
    .unwrap();
    let hits = engine
        .calendar
        .query_overlaps("rolls-ghost", &Span::new(T0, T0 + 60 * DAY_MS))
        .await;
    let ids: Vec<Ulid> = hits.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![kept.id, blackout]);
    assert_eq!(engine.bookings_for_item("rolls-ghost").len(), 11);
    let _ = std::fs::remove_file(&path);
}

// ── Blackouts ────────────────────────────────────────────

#[tokio::test]
async fn blackout_blocks_then_releases() {
    let (engine, _) = mem_engine();
    let maintenance = Span::new(T0, T0 + 3 * DAY_MS);
    let id = engine.add_blackout("gulfstream-g650", maintenance).await.unwrap();

    let err = engine.reserve(day("gulfstream-g650", 1), "a").await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Conflict {
            item_id: "gulfstream-g650".into(),
            conflicts: vec![maintenance],
        }
    );

    assert_eq!(engine.remove_blackout(id).await.unwrap(), maintenance);
    assert_eq!(engine.remove_blackout(id).await, Err(EngineError::BlackoutNotFound(id)));
    assert_ok!(engine.reserve(day("gulfstream-g650", 1), "a").await);
}

#[tokio::test]
async fn blackout_over_booking_is_accepted() {
    let (engine, _) = mem_engine();
    let b = engine.reserve(day("villa-aurora", 0).with_days(3), "a").await.unwrap();
    assert_ok!(engine.add_blackout("villa-aurora", b.range).await);
    assert_eq!(engine.get_booking(b.id).unwrap().status, BookingStatus::PendingPayment);
}

#[tokio::test]
async fn blackout_on_unknown_item() {
    let (engine, _) = mem_engine();
    let err = engine.add_blackout("ghost-ship", Span::new(T0, T0 + DAY_MS)).await.unwrap_err();
    assert_eq!(err, EngineError::ItemNotFound("ghost-ship".into()));
}

#[tokio::test]
async fn full_calendar_rejects_blackout_without_journaling() {
    let history: Vec<Event> = (0..MAX_INTERVALS_PER_ITEM as Ms)
        .map(|i| Event::BlackoutAdded {
            id: Ulid::new(),
            item_id: "ferrari-sf90".into(),
            span: Span::new(T0 + i * H, T0 + (i + 1) * H),
        })
        .collect();
    let journal = Arc::new(MemoryJournal::new());
    let engine = Engine::restore(
        &history,
        journal.clone(),
        Collaborators::from_catalog(catalog()),
        PricingConfig::default(),
        EngineConfig::default(),
    )
    .unwrap();

    let late = Span::new(T0 - DAY_MS, T0 - DAY_MS + H);
    let err = engine.add_blackout("ferrari-sf90", late).await.unwrap_err();
    assert_eq!(err, EngineError::LimitExceeded("too many intervals on item"));
    assert!(journal.events().await.is_empty());

    // The log still replays cleanly.
    let mut replay = history;
    replay.extend(journal.events().await);
    assert_ok!(Engine::restore(
        &replay,
        Arc::new(MemoryJournal::new()),
        Collaborators::from_catalog(catalog()),
        PricingConfig::default(),
        EngineConfig::default(),
    ));
}

#[tokio::test]
async fn journal_failure_leaves_no_blackout() {
    let (engine, journal) = mem_engine();
    journal.fail_appends(true);
    let err = engine
        .add_blackout("rolls-ghost", Span::new(T0, T0 + 2 * DAY_MS))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Journal(_)));
    assert!(engine
        .calendar
        .query_overlaps("rolls-ghost", &Span::new(T0, T0 + 2 * DAY_MS))
        .await
        .is_empty());

    journal.fail_appends(false);
    assert_ok!(engine.reserve(day("rolls-ghost", 0), "a").await);
}

#[tokio::test]
async fn multi_year_refit_blackout() {
    let (engine, _) = mem_engine();
    let refit = Span::new(T0, T0 + 2 * 365 * DAY_MS);
    assert_ok!(engine.add_blackout("azimut-grande", refit).await);

    let err = engine.reserve(day("azimut-grande", 400), "a").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    let endless = Span::new(T0, T0 + MAX_BLACKOUT_SPAN_MS + DAY_MS);
    assert_eq!(
        engine.add_blackout("azimut-grande", endless).await,
        Err(EngineError::LimitExceeded("span too wide"))
    );
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn quote_leaves_calendar_alone() {
    let (engine, journal) = mem_engine();
    let quote = engine
        .quote(&req("ferrari-sf90", T0, T0 + 26 * H, Tier::Premium))
        .await
        .unwrap();
    assert_eq!(quote.total, Money::from_cents(442_260));
    assert!(journal.events().await.is_empty());
    assert!(engine.bookings_for_item("ferrari-sf90").is_empty());

    // Identical input, identical quote.
    let again = engine
        .quote(&req("ferrari-sf90", T0, T0 + 26 * H, Tier::Premium))
        .await
        .unwrap();
    assert_eq!(quote, again);
}

#[tokio::test]
async fn seasonal_multiplier_applies_to_subtotal() {
    let (engine, _) = mem_engine();
    // Art Basel week in the sample catalog: 1.5×.
    let start = 1_796_083_200_000;
    let quote = engine
        .quote(&req("ferrari-sf90", start, start + DAY_MS, Tier::Standard))
        .await
        .unwrap();
    assert_eq!(quote.seasonal_multiplier, dec!(1.5));
    assert_eq!(quote.subtotal, Money::from_cents(225_000));
}

#[tokio::test]
async fn check_availability_lists_conflicts() {
    let (engine, _) = mem_engine();
    assert!(engine
        .check_availability("azimut-grande", Span::new(T0, T0 + DAY_MS))
        .await
        .unwrap()
        .available);

    let b = engine.reserve(day("azimut-grande", 0), "a").await.unwrap();
    // azimut-grande has a six-hour turnaround.
    let window = Span::new(b.range.end + 5 * H, b.range.end + 10 * H);
    let got = engine.check_availability("azimut-grande", window).await.unwrap();
    assert!(!got.available);
    assert_eq!(got.conflicts, vec![b.range]);

    assert_err!(engine.check_availability("nope", window).await);
}

#[tokio::test]
async fn notify_sees_reservation() {
    let (engine, _) = mem_engine();
    let mut rx = engine.notify.subscribe("ferrari-sf90");
    let b = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), Event::BookingReserved { booking: b.clone() });
    engine.cancel(b.id).await.unwrap();
    assert!(matches!(rx.recv().await.unwrap(), Event::BookingCancelled { id, .. } if id == b.id));
}

// ── Collaborator failures ────────────────────────────────

struct SlowSeasons;

#[async_trait]
impl SeasonalRates for SlowSeasons {
    async fn seasonal_multiplier(&self, _: &InventoryItem, _: &Span) -> Result<Option<Decimal>, CollaboratorError> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(None)
    }
}

struct DownTaxes;

#[async_trait]
impl TaxRates for DownTaxes {
    async fn tax_rate(&self, _: &str) -> Result<Option<Decimal>, CollaboratorError> {
        Err(CollaboratorError("tax service returned 503".into()))
    }
}

struct NoAddOns;

#[async_trait]
impl AddOnCatalog for NoAddOns {
    async fn addon_price(&self, _: &str) -> Result<Option<Money>, CollaboratorError> {
        Ok(None)
    }
}

#[tokio::test]
async fn slow_collaborator_times_out() {
    let mut collaborators = Collaborators::from_catalog(catalog());
    collaborators.seasons = Arc::new(SlowSeasons);
    let engine = engine_with(
        Arc::new(MemoryJournal::new()),
        collaborators,
        EngineConfig {
            collaborator_timeout_ms: 50,
            ..EngineConfig::default()
        },
    );

    let err = engine.reserve(day("ferrari-sf90", 0), "a").await.unwrap_err();
    assert!(matches!(err, EngineError::PricingUnavailable(_)));
    assert!(err.is_retryable());
    assert!(engine.bookings_for_item("ferrari-sf90").is_empty());
}

#[tokio::test]
async fn failing_collaborator_is_pricing_unavailable() {
    let mut collaborators = Collaborators::from_catalog(catalog());
    collaborators.taxes = Arc::new(DownTaxes);
    let engine = engine_with(Arc::new(MemoryJournal::new()), collaborators, EngineConfig::default());
    let err = engine.quote(&day("ferrari-sf90", 0)).await.unwrap_err();
    assert_eq!(err, EngineError::PricingUnavailable("taxes".into()));
    // Collaborator detail is logged, not returned.
    assert!(!err.to_string().contains("503"));
}

#[tokio::test]
async fn missing_add_on_catalog_entry() {
    let mut collaborators = Collaborators::from_catalog(catalog());
    collaborators.add_ons = Arc::new(NoAddOns);
    let engine = engine_with(Arc::new(MemoryJournal::new()), collaborators, EngineConfig::default());
    let mut request = day("ferrari-sf90", 0);
    request.add_ons.push(AddOnLine { addon_id: "chauffeur".into(), quantity: 1 });
    assert_eq!(
        engine.reserve(request, "a").await,
        Err(EngineError::UnknownAddOn("chauffeur".into()))
    );
}

trait WithDays {
    fn with_days(self, days: Ms) -> Self;
}

impl WithDays for PricingRequest {
    fn with_days(mut self, days: Ms) -> Self {
        self.range = Span::new(self.range.start, self.range.start + days * DAY_MS);
        self
    }
}
