//! # Seed Data Generator
//!
//! Populates the database with a demo zone, plans, a driver and a batch of
//! deposit bottles for development.
//!
//! ## Usage
//! ```bash
//! # Seed using freshtick.toml / FRESHTICK_* settings
//! cargo run -p freshtick-db --bin seed
//!
//! # Custom bottle count and config file
//! cargo run -p freshtick-db --bin seed -- --bottles 500 --config ./freshtick.toml
//! ```
//!
//! Bottle numbers are `FT-000001`, `FT-000002`, ... with the default
//! deposit. The run is skipped when the demo zone already exists.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use chrono::NaiveTime;
use tracing::{info, warn};

use freshtick_core::{
    Bottle, Driver, Frequency, GeoPoint, Money, SubscriptionPlan, SubscriptionPlanItem,
    Vertical, Zone, ZoneProductOverride, DEFAULT_BOTTLE_DEPOSIT_PAISE,
};
use freshtick_db::{Database, FreshtickConfig};

const DEMO_ZONE_ID: &str = "zone-kochi-north";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut bottles: usize = 200;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bottles" | "-b" => {
                if i + 1 < args.len() {
                    bottles = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Freshtick Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -b, --bottles <N>     Number of bottles to register (default: 200)");
                println!("  -c, --config <PATH>   Config file (default: $FRESHTICK_CONFIG)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = FreshtickConfig::load(config_path)?;
    config.init_tracing();

    info!(path = %config.database.path.display(), bottles, "Seeding database");
    let db = Database::new(config.db_config()).await?;

    if db.zones().get_by_id(DEMO_ZONE_ID).await?.is_some() {
        warn!(zone_id = DEMO_ZONE_ID, "Demo data already present; skipping seed");
        println!("Database already seeded. Delete the database file to regenerate.");
        return Ok(());
    }

    let zone = demo_zone();
    db.zones().insert(&zone).await?;
    db.zones()
        .upsert_product_override(&ZoneProductOverride {
            zone_id: zone.id.clone(),
            product_id: "paneer-200g".to_string(),
            price: None,
            is_available: false,
        })
        .await?;
    println!("✓ Zone {} ({})", zone.name, zone.code);

    for plan in demo_plans() {
        db.plans().insert(&plan).await?;
        println!("✓ Plan {}", plan.name);
    }

    db.drivers()
        .insert(&Driver {
            id: "driver-demo-1".to_string(),
            name: "Demo Driver".to_string(),
            zone_id: Some(zone.id.clone()),
            is_active: true,
        })
        .await?;
    println!("✓ Driver");

    let deposit = Money::from_paise(DEFAULT_BOTTLE_DEPOSIT_PAISE);
    let mut registered = 0;
    for n in 1..=bottles {
        let bottle = Bottle::new(freshtick_core::new_id(), format!("FT-{n:06}"), deposit);
        if let Err(e) = db.bottles().insert(&bottle).await {
            warn!(number = %bottle.bottle_number, error = %e, "Failed to register bottle");
            continue;
        }
        registered += 1;
    }
    println!("✓ {} bottles ({} available)", registered, db.bottles().count_available().await?);

    info!("Seed complete");
    Ok(())
}

fn demo_zone() -> Zone {
    let mut zone = Zone::new(DEMO_ZONE_ID, "Kochi North", "KOCHI-N1")
        .with_boundary(vec![
            GeoPoint::new(10.00, 76.25),
            GeoPoint::new(10.00, 76.35),
            GeoPoint::new(10.08, 76.35),
            GeoPoint::new(10.08, 76.25),
        ])
        .with_pincodes(["682017", "682018", "682024"])
        .with_service_days(0..=6)
        .with_verticals([Vertical::DailyFresh]);

    if let (Some(start), Some(end)) = (
        NaiveTime::from_hms_opt(5, 0, 0),
        NaiveTime::from_hms_opt(9, 0, 0),
    ) {
        zone = zone.with_service_window(start, end);
    }
    zone.delivery_charge = Money::from_rupees(10);
    zone.min_order_amount = Money::from_rupees(50);
    zone
}

fn demo_plans() -> Vec<SubscriptionPlan> {
    let milk = SubscriptionPlanItem {
        product_id: "milk-1l".to_string(),
        quantity: 1,
        unit_price: Money::from_rupees(68),
        requires_bottle: true,
    };
    let curd = SubscriptionPlanItem {
        product_id: "curd-400g".to_string(),
        quantity: 1,
        unit_price: Money::from_rupees(45),
        requires_bottle: false,
    };

    vec![
        SubscriptionPlan {
            id: "plan-daily-milk".to_string(),
            name: "Daily Milk".to_string(),
            frequency: Frequency::Daily,
            discount_bps: 0,
            items: vec![milk.clone()],
        },
        SubscriptionPlan {
            id: "plan-alternate-milk".to_string(),
            name: "Alternate Day Milk".to_string(),
            frequency: Frequency::Alternate,
            discount_bps: 0,
            items: vec![SubscriptionPlanItem {
                quantity: 2,
                ..milk.clone()
            }],
        },
        SubscriptionPlan {
            id: "plan-weekend-combo".to_string(),
            name: "Weekend Combo".to_string(),
            frequency: Frequency::Weekly {
                days: BTreeSet::from([0, 6]),
            },
            discount_bps: 500,
            items: vec![milk, curd],
        },
    ]
}
