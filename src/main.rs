use town_bike::args::TopLevelCmd;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // color-eyre reports errors, human-panic keeps the panic message friendly
    let (_panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install()?;
    human_panic::setup_panic!();

    let arg_config: TopLevelCmd = argh::from_env();

    let cancel_app = CancellationToken::new();
    let ctrl_c_token = cancel_app.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    town_bike::run(arg_config, cancel_app).await?;
    Ok(())
}
