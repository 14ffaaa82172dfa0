use vexble::config::TransferConfig;
use vexble::devices::bluetooth::scan_for_devices;
use vexble::{EventBus, ProductType, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let product = args
        .next()
        .and_then(|name| ProductType::from_name(&name))
        .unwrap_or(ProductType::Exp);

    // Find the first advertising device
    let devices = scan_for_devices(product, None).await?;
    let device = devices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No {:?} found", product))?;
    println!("Connecting to {}", device.name().unwrap_or("unnamed device"));

    let transport = device.connect().await?;
    let mut session =
        Session::connect(transport, product, TransferConfig::default(), EventBus::default())
            .await?;

    if !session.is_unlocked() {
        let code = args
            .next()
            .ok_or_else(|| anyhow::anyhow!("Device is locked, pass the code shown on its screen"))?;
        if !session.unlock(code.parse()?).await? {
            anyhow::bail!("Lock code was not accepted");
        }
    }

    let info = session.refresh_device_info().await?;
    println!(
        "{:?} running {}",
        info.product,
        info.system_version.as_deref().unwrap_or("unknown firmware")
    );

    if session.capabilities().cdc2 {
        println!("teamnumber = {}", session.kv_read("teamnumber").await?);
    }

    session.disconnect().await?;

    Ok(())
}
