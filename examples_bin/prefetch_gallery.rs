//! Prefetches a gallery of thumbnails in the background at low priority,
//! then loads them "for real" once the user scrolls to them, demonstrating
//! that the second load is served from cache instead of hitting the network
//! again.

use std::time::Duration;

use image_pipeline::{ImagePipeline, ImageRequest, PipelineConfigBuilder, PrefetchDestination, Prefetcher};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let pipeline = ImagePipeline::new(PipelineConfigBuilder::new().build());
    let prefetcher = Prefetcher::new(pipeline.clone(), 4);

    let gallery: Vec<ImageRequest> = (0..20)
        .map(|i| ImageRequest::new(Url::parse(&format!("https://images.example.com/thumb-{i}.jpg")).unwrap()))
        .collect();

    let _tokens = prefetcher.start_prefetching(gallery.clone(), PrefetchDestination::MemoryCache);
    println!("prefetching {} thumbnails in the background", gallery.len());

    // Simulate the user scrolling into view after a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for request in gallery.iter().take(5) {
        let response = pipeline.load_image(request.clone()).await?;
        println!("{}: served from {:?}", request.url(), response.source);
    }

    Ok(())
}
