use itertools::Itertools;
use std::error::Error;
use std::sync::Arc;
use storage_ip_pool::models::RangeQuery;
use storage_ip_pool::output::{print_usage_csv, print_usage_summary};
use storage_ip_pool::store::{read_topology, MemoryStore, StaticTopology};
use storage_ip_pool::{PoolConfig, StoragePool};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    log4rs::init_file("log4rs.yml", Default::default())?;
    let config = PoolConfig::from_env()?;
    log::info!("#Start main() topology={}", config.topology_file);

    let directory = Arc::new(StaticTopology::new(read_topology(&config.topology_file)?));
    let pool = StoragePool::new(Arc::new(MemoryStore::new()), Arc::clone(&directory), &config);

    let seeds = &directory.topology().ranges;
    let created = pool.seed(seeds).await;
    log::info!("Seeded {} of {} ranges", created.len(), seeds.len());

    for pod_id in created.iter().map(|range| range.pod_id).unique() {
        match pool.take_address(pod_id, &config.owner).await? {
            Some(address) => log::info!("Pod {pod_id}: claimed {address}"),
            None => log::warn!("Pod {pod_id}: no free storage IP"),
        }
    }

    let usage = pool.range_usage(&RangeQuery::default()).await?;
    print_usage_summary(&usage);
    print_usage_csv(&usage);

    Ok(())
}
