use anyhow::Result;
use pilot_runtime::Bridge;

pub async fn list(bridge: &Bridge) -> Result<()> {
    let devices = bridge.list_devices().await?;
    if devices.is_empty() {
        println!("no devices connected");
        return Ok(());
    }
    for device in devices {
        println!("{device}");
    }
    Ok(())
}
