//! `otactl devices`

use anyhow::Result;
use meshota_vendors::definitions;

use crate::output;

pub async fn execute(json: bool) -> Result<()> {
    let devices = definitions();
    output::print_devices(&devices, json);
    Ok(())
}
