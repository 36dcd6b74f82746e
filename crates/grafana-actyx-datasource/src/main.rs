use grafana_actyx_datasource::ActyxDataSource;

#[grafana_plugin_sdk::main(services(data, diagnostics, resource), init_subscriber = true)]
async fn plugin() -> ActyxDataSource {
    ActyxDataSource::new()?
}
