// ============================================================================
// Basic Usage Example
// ============================================================================

use order_matching_engine::numeric::{Price, Quantity};
use order_matching_engine::prelude::*;
use std::error::Error;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "logging")]
    order_matching_engine::utils::init_tracing();

    println!("=== Matching Engine Example ===\n");

    let engine = MatchingEngineBuilder::new()
        .with_fee_rate("0.001".parse()?)
        .build(Arc::new(LoggingEventHandler))?;
    engine.register_product("WIDGET", "Widget");
    let widget = ProductId::from("WIDGET");

    println!("Created matching engine ({})\n", engine.algorithm_name());

    // Add sell orders at different prices
    println!("Adding sell orders...");
    for i in 0i64..5 {
        engine.submit_order(
            format!("seller_{}", i),
            "WIDGET",
            Side::Sell,
            Quantity::from_integer(1)?,
            Price::from_integer(500 + i * 10)?,
            TimeInForce::GoodTillCancel,
        )?;
    }

    // Add buy orders below the asks
    println!("Adding buy orders...");
    for i in 0i64..5 {
        engine.submit_order(
            format!("buyer_{}", i),
            "WIDGET",
            Side::Buy,
            Quantity::from_integer(1)?,
            Price::from_integer(490 - i * 10)?,
            TimeInForce::Day,
        )?;
    }

    print_book(&engine, &widget);

    // Crosses the first three ask levels
    println!("\n=== Submitting Crossing Order ===");
    let report = engine.submit(OrderDraft::new(
        "aggressive_buyer",
        "WIDGET",
        Side::Buy,
        Quantity::from_integer(3)?,
        Price::from_integer(525)?,
        TimeInForce::GoodTillCancel,
    ))?;

    println!("\nTransactions:");
    for tx in &report.transactions {
        println!(
            "  {} {} @ {} (fee {})",
            tx.external_id, tx.quantity, tx.executed_price, tx.fee
        );
    }
    println!(
        "Order {} is {} ({} filled)",
        report.order.id.as_uuid(),
        report.order.status().as_str(),
        report.order.filled_quantity()
    );

    // Large orders wait for approval
    println!("\n=== Approval ===");
    let held = engine.submit(OrderDraft::new(
        "whale",
        "WIDGET",
        Side::Sell,
        Quantity::from_integer(5_000)?,
        Price::from_integer(600)?,
        TimeInForce::GoodTillCancel,
    ))?;
    println!("Large order is {}", held.order.status().as_str());
    let approved = engine.approve_order(&held.order.id, "risk_desk")?;
    println!("After approval: {}", approved.order.status().as_str());

    // Cancel the remaining asks of one seller
    let cancelled = engine.cancel_all_for_account(&AccountId::from("seller_4"), Some("done"))?;
    println!("\nCancelled {} order(s) for seller_4", cancelled.orders.len());

    // Day orders expire at the cut-off
    let sweep = engine.run_expiration_sweep(chrono::Utc::now() + chrono::TimeDelta::days(2))?;
    println!("Expired {} day order(s)", sweep.orders.len());

    print_book(&engine, &widget);

    println!("\n=== Price History ===");
    for bar in engine.price_bars(&widget) {
        println!(
            "  {} O {} H {} L {} C {} V {} ({} trades)",
            bar.period_start, bar.open, bar.high, bar.low, bar.close, bar.volume, bar.trade_count
        );
    }
    println!("Last price: {:?}", engine.last_price(&widget));

    Ok(())
}

fn print_book(engine: &MatchingEngine, product: &ProductId) {
    println!("\n=== Order Book Snapshot ===");
    let Some(snapshot) = engine.latest_snapshot(product) else {
        println!("(empty)");
        return;
    };

    println!("\nBids:");
    for (price, qty) in snapshot.bid_levels.iter().rev() {
        println!("  {} @ {}", qty, price);
    }

    println!("\nAsks:");
    for (price, qty) in &snapshot.ask_levels {
        println!("  {} @ {}", qty, price);
    }

    println!("\nBest bid: {:?}", snapshot.best_bid);
    println!("Best ask: {:?}", snapshot.best_ask);
}
