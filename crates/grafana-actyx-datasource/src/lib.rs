/*! A Grafana backend datasource for [Actyx] event stores.

Dashboards query the event store using AQL; the results are reshaped into
Grafana data frames. The crate is divided into these modules:

- [`settings`] validates the per-instance configuration entered in the config editor,
  most importantly the app manifest used to authenticate with the node.
- [`query`] contains the query model edited by the query editors and the substitution
  of the dashboard time range into AQL.
- [`client`] talks to the node's HTTP API.
- [`frame`] infers a frame layout from the JSON payloads of the returned events.
- [`plugin`] ties everything together as a Grafana backend plugin, serving queries,
  health checks, metrics and the diagnostics resource used by the explore editor.

[Actyx]: https://developer.actyx.com/
*/
#![deny(missing_docs)]

pub mod client;
pub mod frame;
pub mod metrics;
pub mod plugin;
pub mod query;
pub mod settings;

#[cfg(test)]
mod testing;

pub use plugin::ActyxDataSource;
