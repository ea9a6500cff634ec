use anyhow::Result;
use nfse_harvest::utils::logging;
use nfse_harvest::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env()?;

    // 初始化并运行应用
    let _summary = App::initialize(config).await?.run().await?;

    Ok(())
}
