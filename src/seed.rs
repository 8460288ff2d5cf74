//! Demo data bootstrap
//!
//! Creates and populates the sample retail schema (products, suppliers,
//! purchases, sales) so the service answers questions out of the box.
//! Seeding only runs against empty tables.

use crate::error::AppError;
use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

const NUM_PRODUCTS: i64 = 50;
const NUM_SUPPLIERS: i64 = 10;
const NUM_PURCHASES: i64 = 200;
const NUM_SALES: i64 = 300;

const CATEGORIES: &[&str] = &["Food", "Drink", "Pet", "Electronics", "Clothes", "Toys"];

const PRODUCT_WORDS: &[&str] = &[
    "Aurora", "Breeze", "Cobalt", "Dune", "Ember", "Fjord", "Glide", "Harbor", "Indigo", "Juniper",
    "Koda", "Lumen", "Mesa", "Nimbus", "Onyx", "Pico", "Quartz", "Ridge", "Sable", "Tundra",
];

const SUPPLIER_NAMES: &[&str] = &[
    "Northwind Trading", "Cascade Supply Co", "Harbor & Sons", "Meridian Wholesale",
    "Blue Finch Goods", "Stonegate Partners", "Vector Distribution", "Alpine Provisions",
    "Copperfield Ltd", "Juniper Logistics",
];

const CITIES: &[&str] = &[
    "Berlin", "Lyon", "Porto", "Austin", "Osaka", "Cork", "Malmo", "Turin", "Graz", "Leiden",
];

/// Create the demo tables if they do not exist
pub async fn ensure_demo_schema(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS products (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                category VARCHAR(100),
                description TEXT
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS suppliers (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                city VARCHAR(100),
                address VARCHAR(255)
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS purchases (
                id SERIAL PRIMARY KEY,
                product_id INTEGER NOT NULL REFERENCES products(id),
                supplier_id INTEGER NOT NULL REFERENCES suppliers(id),
                purchase_date DATE NOT NULL,
                quantity INTEGER NOT NULL,
                unit_cost DOUBLE PRECISION NOT NULL
            )",
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS sales (
                id SERIAL PRIMARY KEY,
                product_id INTEGER NOT NULL REFERENCES products(id),
                sale_date DATE NOT NULL,
                quantity INTEGER NOT NULL,
                unit_price DOUBLE PRECISION NOT NULL
            )",
            &[],
        )
        .await?;

    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_purchases_product_id ON purchases(product_id)",
            &[],
        )
        .await;
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_sales_product_id ON sales(product_id)",
            &[],
        )
        .await;

    info!("✅ Demo schema ready");
    Ok(())
}

/// Populate the demo tables with sample rows. A non-empty products table
/// means a previous run already seeded; nothing is touched then.
pub async fn seed_demo_data(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;

    let row = client.query_one("SELECT COUNT(*) FROM products", &[]).await?;
    let existing: i64 = row.get(0);
    if existing > 0 {
        info!("Demo data already present ({} products), skipping seed", existing);
        return Ok(());
    }

    info!("🌱 Seeding demo data...");
    let mut rng = rand::thread_rng();
    let today = Utc::now().date_naive();

    for i in 0..NUM_PRODUCTS {
        let word = PRODUCT_WORDS[(i as usize) % PRODUCT_WORDS.len()];
        let category = *CATEGORIES.choose(&mut rng).unwrap_or(&CATEGORIES[0]);
        let name = format!("{} {}", word, i + 1);
        let description = format!("{} item from the {} range", category, word);
        client
            .execute(
                "INSERT INTO products (name, category, description) VALUES ($1, $2, $3)",
                &[&name, &category, &description],
            )
            .await?;
    }

    for i in 0..NUM_SUPPLIERS {
        let name = SUPPLIER_NAMES[(i as usize) % SUPPLIER_NAMES.len()];
        let city = CITIES[(i as usize) % CITIES.len()];
        let address = format!("{} Dock Road {}", city, i + 1);
        client
            .execute(
                "INSERT INTO suppliers (name, city, address) VALUES ($1, $2, $3)",
                &[&name, &city, &address],
            )
            .await?;
    }

    for _ in 0..NUM_PURCHASES {
        let product_id = rng.gen_range(1..=NUM_PRODUCTS) as i32;
        let supplier_id = rng.gen_range(1..=NUM_SUPPLIERS) as i32;
        let purchase_date = today - Duration::days(rng.gen_range(0..365));
        let quantity = rng.gen_range(1..100) as i32;
        let unit_cost = rng.gen_range(1.0..250.0);
        client
            .execute(
                "INSERT INTO purchases (product_id, supplier_id, purchase_date, quantity, unit_cost)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&product_id, &supplier_id, &purchase_date, &quantity, &unit_cost],
            )
            .await?;
    }

    for _ in 0..NUM_SALES {
        let product_id = rng.gen_range(1..=NUM_PRODUCTS) as i32;
        let sale_date = today - Duration::days(rng.gen_range(0..365));
        let quantity = rng.gen_range(1..20) as i32;
        let unit_price = rng.gen_range(2.0..400.0);
        client
            .execute(
                "INSERT INTO sales (product_id, sale_date, quantity, unit_price)
                 VALUES ($1, $2, $3, $4)",
                &[&product_id, &sale_date, &quantity, &unit_price],
            )
            .await?;
    }

    info!(
        "✅ Seeded {} products, {} suppliers, {} purchases, {} sales",
        NUM_PRODUCTS, NUM_SUPPLIERS, NUM_PURCHASES, NUM_SALES
    );
    Ok(())
}
