use pimbin::conf::{self, PimbinConfig};
use pimbin::{routes, Pimbin};

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let figment = conf::figment();
    let config = PimbinConfig::from_figment(&figment)?;
    let pimbin = Pimbin::from_config(&config).await?;

    let _rocket = routes::build(pimbin, figment).launch().await?;
    Ok(())
}
