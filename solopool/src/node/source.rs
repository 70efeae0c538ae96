//! Template production.
//!
//! One task owns the node RPC polling loop. It refreshes on two triggers:
//! a ZMQ `hashblock` notification (a new tip invalidates the current
//! template immediately) and a periodic safety tick that also picks up
//! fee/transaction churn. Refreshes that do not change anything meaningful
//! are discarded so downstream job builds stay quiet.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{NodeClient, Template, hashblock_task};
use crate::tracing::prelude::*;

/// Safety-net refresh cadence when no ZMQ notification arrives.
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// A newly produced template plus the work-restart marker.
///
/// `clean` is set when the previous block hash changed: jobs built from
/// this template must tell miners to abandon in-flight work.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub template: Arc<Template>,
    pub clean: bool,
}

/// Polls `getblocktemplate` and emits fresh [`Template`] snapshots.
pub struct TemplateSource {
    client: Arc<NodeClient>,
    zmq_endpoint: String,
    template_tx: mpsc::Sender<NewTemplate>,
    shutdown: CancellationToken,
    last: Option<Arc<Template>>,
}

impl TemplateSource {
    pub fn new(
        client: Arc<NodeClient>,
        zmq_endpoint: String,
        template_tx: mpsc::Sender<NewTemplate>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            zmq_endpoint,
            template_tx,
            shutdown,
            last: None,
        }
    }

    /// Run until shutdown. Never returns early on node errors; the last
    /// good template stays in effect until a refresh succeeds.
    pub async fn run(mut self) {
        let (block_tx, mut block_rx) = mpsc::channel(8);
        let zmq = tokio::spawn(hashblock_task(
            self.zmq_endpoint.clone(),
            block_tx,
            self.shutdown.clone(),
        ));

        let mut tick = tokio::time::interval(REFRESH_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.refresh().await;
                }
                Some(()) = block_rx.recv() => {
                    // Coalesce bursts of tip changes into one refresh.
                    while block_rx.try_recv().is_ok() {}
                    self.refresh().await;
                    tick.reset();
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        let _ = zmq.await;
        trace!("Template source stopped");
    }

    async fn refresh(&mut self) {
        let gbt = match self.client.get_block_template().await {
            Ok(gbt) => gbt,
            Err(e) => {
                warn!(error = %e, "getblocktemplate failed, keeping last good template");
                return;
            }
        };

        let template = match Template::try_from(gbt) {
            Ok(template) => template,
            Err(e) => {
                warn!(error = %e, "discarding unusable template");
                return;
            }
        };

        if let Some(update) = self.consider(template) {
            if update.clean {
                info!(
                    height = update.template.height,
                    txs = update.template.transactions.len(),
                    "New block template (chain tip changed)"
                );
            } else {
                debug!(
                    height = update.template.height,
                    txs = update.template.transactions.len(),
                    "Refreshed block template"
                );
            }
            if self.template_tx.send(update).await.is_err() {
                // Job builder gone; shutdown is in progress.
                self.shutdown.cancel();
            }
        }
    }

    /// Decide whether a freshly fetched template supersedes the last one.
    fn consider(&mut self, template: Template) -> Option<NewTemplate> {
        let fresh = Arc::new(template);

        let update = match &self.last {
            None => Some(NewTemplate {
                template: fresh.clone(),
                clean: true,
            }),
            Some(last) => {
                let tip_changed = fresh.prev_blockhash != last.prev_blockhash
                    || fresh.height != last.height;
                let time_advanced = fresh.cur_time >= last.cur_time.saturating_add(1);

                if tip_changed {
                    Some(NewTemplate {
                        template: fresh.clone(),
                        clean: true,
                    })
                } else if time_advanced {
                    Some(NewTemplate {
                        template: fresh.clone(),
                        clean: false,
                    })
                } else {
                    None
                }
            }
        };

        if update.is_some() {
            self.last = Some(fresh);
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::BlockHash;
    use bitcoin::hashes::Hash;

    fn template(prev: u8, height: u64, cur_time: u32) -> Template {
        Template {
            height,
            prev_blockhash: BlockHash::from_byte_array([prev; 32]),
            coinbase_value: 0,
            witness_commitment: None,
            coinbase_aux: Vec::new(),
            bits: bitcoin::CompactTarget::from_consensus(0x1d00ffff),
            network_target: crate::hashing::target_from_bits(0x1d00ffff),
            min_time: 0,
            cur_time,
            version: 0x2000_0000,
            transactions: Vec::new(),
        }
    }

    fn source() -> TemplateSource {
        let (template_tx, _rx) = mpsc::channel(8);
        let client = Arc::new(
            NodeClient::new(&crate::config::RpcConfig {
                url: "http://127.0.0.1:18443".into(),
                user: "u".into(),
                password: "p".into(),
                timeout_s: 1,
            })
            .unwrap(),
        );
        TemplateSource::new(client, "tcp://127.0.0.1:28332".into(), template_tx, CancellationToken::new())
    }

    #[test]
    fn first_template_is_clean() {
        let mut source = source();
        let update = source.consider(template(1, 100, 1000)).unwrap();
        assert!(update.clean);
    }

    #[test]
    fn tip_change_is_clean_time_advance_is_not() {
        let mut source = source();
        source.consider(template(1, 100, 1000));

        let update = source.consider(template(1, 100, 1001)).unwrap();
        assert!(!update.clean, "time-only refresh must not restart work");

        let update = source.consider(template(2, 101, 1001)).unwrap();
        assert!(update.clean, "new tip must restart work");
    }

    #[test]
    fn unchanged_template_is_discarded() {
        let mut source = source();
        source.consider(template(1, 100, 1000));
        assert!(source.consider(template(1, 100, 1000)).is_none());
    }
}
