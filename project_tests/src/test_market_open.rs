//! # Market-Open Live Probe
//!
//! Asks the market-open oracle for a verdict against the live quote feed and
//! prints the raw probe quote next to it.

use anyhow::Result;
use clap::Parser;
use lib_realtime::markets::MarketOracle;
use lib_realtime::markets::sina::QuoteSource;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(about = "Probe the realtime feed and report whether the market is open")]
struct Args {
    /// Symbol to probe.
    #[clap(long, default_value = "sh000001")]
    symbol: String,

    #[clap(long, default_value = "http://hq.sinajs.cn/list=")]
    quote_url: String,

    #[clap(long, default_value = "http://finance.sina.com.cn/")]
    referer: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let source = Arc::new(QuoteSource::sina(
        args.quote_url.clone(),
        args.referer.clone(),
        Duration::from_secs(10),
    )?);

    println!("[*] Requesting probe quote for {}...", args.symbol);
    match source.fetch_one(&args.symbol).await {
        Ok(Some(quote)) => {
            println!("\n[SUCCESS] Probe quote received:");
            println!("-----------------------------------------------");
            println!("{}", serde_json::to_string_pretty(&quote)?);
            println!("-----------------------------------------------");
        }
        Ok(None) => println!("[WARN] Upstream returned no record for {}", args.symbol),
        Err(e) => {
            eprintln!("\n[ERROR] Probe request failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    let oracle = MarketOracle::new(source, args.symbol.clone());
    let open = oracle.is_market_open(&args.symbol).await;
    println!("[INFO] is_market_open({}) = {}", args.symbol, open);
    Ok(())
}
