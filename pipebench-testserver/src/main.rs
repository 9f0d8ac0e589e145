use std::time::Duration;

use pipebench_testserver::{Faults, TestServer, TestServerOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut options = TestServerOptions::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--base-domain" => {
                options.base_domain = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--base-domain requires a value"))?;
            }
            "--latency-ms" => {
                let ms: u64 = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--latency-ms requires a value"))?
                    .parse()?;
                options.faults.latency = Some(Duration::from_millis(ms));
            }
            "--drop-tips" => options.faults.drop_tips = true,
            "--rate-limit-comments" => options.faults.rate_limit_comments = true,
            "-h" | "--help" => {
                eprintln!(
                    "pipebench-testserver\n\nUSAGE:\n  pipebench-testserver [--base-domain u.isucon.dev] [--latency-ms N] [--drop-tips] [--rate-limit-comments]\n\nOUTPUT:\n  Prints HTTP_URL=<url> and DNS_ADDR=<ip:port> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let faults: &Faults = &options.faults;
    if faults.drop_tips || faults.rate_limit_comments || faults.latency.is_some() {
        eprintln!("faults enabled: {faults:?}");
    }

    let server = TestServer::start_with(options).await?;

    println!("HTTP_URL={}", server.base_url());
    if let Some(dns) = server.dns_addr() {
        println!("DNS_ADDR={dns}");
    }

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
