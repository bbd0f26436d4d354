//! Loads a handful of images through the default HTTP pipeline and prints
//! where each response came from (network, memory, disk).

use image_pipeline::{ImagePipeline, ImageRequest, PipelineConfigBuilder, ResizeProcessor, ProcessorHandle};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let pipeline = ImagePipeline::new(PipelineConfigBuilder::new().build());

    let urls = [
        "https://images.example.com/cat.jpg",
        "https://images.example.com/dog.jpg",
    ];

    for url in urls {
        let request = ImageRequest::new(Url::parse(url)?)
            .with_processors(vec![ProcessorHandle::new(ResizeProcessor::new(256, 256))]);

        match pipeline.load_image(request.clone()).await {
            Ok(response) => {
                println!(
                    "{url}: {:?} from {:?}, cost={}",
                    response.container.size,
                    response.source,
                    response.container.cost()
                );
            }
            Err(err) => eprintln!("{url}: failed: {err}"),
        }

        // Second load for the same request should resolve from the memory
        // cache instead of touching the network.
        let again = pipeline.load_image(request).await?;
        println!("  second load source: {:?}", again.source);
    }

    Ok(())
}
