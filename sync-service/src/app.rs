//! Process wiring shared by the daemon and the one-shot backfill.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use meter_client::domain::MetricKind;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::{
    config::AppConfig,
    sinks::{ConfiguredSink, HttpPushSink},
    sources::{Credential, HttpMeterApi, MeterApi},
    sync::{MeterStream, SyncScheduler},
};

pub type Scheduler = SyncScheduler<HttpMeterApi, ConfiguredSink>;

/// A ready-to-tick scheduler plus the pgwire pool, when one was opened.
pub struct App {
    pub scheduler: Scheduler,
    pub pool: Option<PgPool>,
}

/// Discover the account, register one stream per metric, and attach the
/// configured sink and optional push channel.
pub async fn build(cfg: &AppConfig, now: OffsetDateTime) -> anyhow::Result<App> {
    build_for(cfg, now, &MetricKind::ALL).await
}

/// Like [`build`], registering only the streams for `kinds`.
pub async fn build_for(cfg: &AppConfig, now: OffsetDateTime, kinds: &[MetricKind]) -> anyhow::Result<App> {
    let api = HttpMeterApi::new(cfg.api.auth_url.clone(), cfg.api.data_base_url.clone(), cfg.api_timeout())?;
    let credential = Credential::new(cfg.api.token.clone());

    let account = api
        .fetch_account(&credential)
        .await
        .context("discovering Powershaper account")?;
    tracing::info!(
        account = %account.consent_uuid,
        electricity_from = %account.electricity.earliest,
        gas_from = %account.gas.earliest,
        "account discovered"
    );

    let mut streams = select_streams(MeterStream::for_account(&account, &credential), kinds);
    if streams.is_empty() {
        anyhow::bail!("no streams selected");
    }

    let (sink, pool) = ConfiguredSink::from_config(cfg).await?;

    if cfg.scheduler.resume_from_store {
        let pool = pool
            .as_ref()
            .context("resume_from_store needs the pgwire sink")?;
        for stream in &mut streams {
            resume(pool, stream, now).await?;
        }
    }

    let mut scheduler = SyncScheduler::new(api, sink, cfg.scheduler_config());
    for stream in streams {
        scheduler.add_stream(stream);
    }

    if let Some(push_cfg) = &cfg.push {
        let push = HttpPushSink::new(push_cfg.endpoint.clone(), Duration::from_secs(push_cfg.timeout_secs))?;
        scheduler = scheduler.with_push(Arc::new(push));
        tracing::info!(endpoint = %push_cfg.endpoint, "interval push enabled");
    }

    Ok(App { scheduler, pool })
}

fn select_streams(streams: Vec<MeterStream>, kinds: &[MetricKind]) -> Vec<MeterStream> {
    streams.into_iter().filter(|s| kinds.contains(&s.kind())).collect()
}

async fn resume(pool: &PgPool, stream: &mut MeterStream, now: OffsetDateTime) -> anyhow::Result<()> {
    let id = stream.id();
    match meter_client::db::latest_statistic(pool, &id)
        .await
        .with_context(|| format!("reading stored statistics for {id}"))?
    {
        Some(last) => {
            stream.resume_from(&last, now);
            tracing::info!(stream = %id, start = %last.start, sum = last.sum, "resumed from store");
        }
        None => {
            tracing::info!(stream = %id, "nothing stored yet, will backfill");
        }
    }
    Ok(())
}
