//! End-to-end tests driving `ImagePipeline` through its public API only.

use std::sync::Arc;
use std::time::Duration;

use image_pipeline::{
    DataCache, DiskCacheConfig, DecoderRegistry, IdentityProcessor, ImagePipeline, ImagePipelineError,
    ImageRequest, PassthroughEncoder, PipelineConfigBuilder, Priority, PreviewPolicy, PrefetchDestination,
    ProcessorHandle, ResizeProcessor, StaticDataLoader, TaskEvent,
};
use url::Url;

fn png_bytes(padding: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend(std::iter::repeat(0u8).take(padding));
    bytes
}

fn loader_with(entries: &[(&str, Vec<u8>)]) -> StaticDataLoader {
    let loader = StaticDataLoader::new();
    for (url, bytes) in entries {
        loader.insert(*url, bytes.clone());
    }
    loader
}

fn builder(loader: StaticDataLoader) -> PipelineConfigBuilder {
    PipelineConfigBuilder::new()
        .data_loader(Arc::new(loader))
        .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Incremental)))
        .encoder(Arc::new(PassthroughEncoder))
}

#[tokio::test]
async fn concurrent_loads_for_identical_request_deduplicate() {
    let loader = Arc::new(loader_with(&[("https://e.com/a.png", png_bytes(64))]));
    let config = PipelineConfigBuilder::new()
        .data_loader(loader.clone())
        .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Incremental)))
        .encoder(Arc::new(PassthroughEncoder))
        .build();
    let pipeline = ImagePipeline::new(config);
    let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());

    let results = tokio::join!(
        pipeline.load_image(request.clone()),
        pipeline.load_image(request.clone()),
        pipeline.load_image(request.clone()),
    );
    assert!(results.0.is_ok());
    assert!(results.1.is_ok());
    assert!(results.2.is_ok());
    assert_eq!(loader.call_count(), 1, "three concurrent requests for one image must fetch exactly once");
}

#[tokio::test]
async fn distinct_processor_pipelines_produce_distinct_cache_entries() {
    let loader = Arc::new(loader_with(&[("https://e.com/a.png", png_bytes(64))]));
    let config = PipelineConfigBuilder::new()
        .data_loader(loader.clone())
        .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Incremental)))
        .encoder(Arc::new(PassthroughEncoder))
        .build();
    let pipeline = ImagePipeline::new(config);

    let plain = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());
    let resized = plain.clone().with_processors(vec![ProcessorHandle::new(ResizeProcessor::new(32, 32))]);

    let plain_response = pipeline.load_image(plain.clone()).await.unwrap();
    let resized_response = pipeline.load_image(resized.clone()).await.unwrap();

    assert_ne!(plain_response.container.size, resized_response.container.size);
    assert_eq!(resized_response.container.size.width, 32);

    // Both now resolve from memory independently; neither evicted the other.
    assert!(pipeline.cached_image(&plain).is_some());
    assert!(pipeline.cached_image(&resized).is_some());

    // Distinct processor pipelines share one underlying data fetch.
    assert_eq!(loader.call_count(), 1, "distinct processor pipelines over one image must not refetch data");
}

#[tokio::test]
async fn cancelling_one_subscriber_does_not_affect_another() {
    let loader = loader_with(&[("https://e.com/a.png", png_bytes(64))]);
    let pipeline = ImagePipeline::new(builder(loader).build());
    let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());

    let (handle, _rx) = pipeline.subscribe_image(request.clone()).await;
    let (_second_handle, mut second_rx) = pipeline.subscribe_image(request.clone()).await;
    handle.cancel();

    let mut saw_completed = false;
    while let Some(event) = second_rx.recv().await {
        if let TaskEvent::Completed(Ok(_)) = event {
            saw_completed = true;
            break;
        }
    }
    assert!(saw_completed, "surviving subscriber should still observe completion");
}

#[tokio::test]
async fn progressive_preview_precedes_final_result_when_processor_opts_in() {
    let loader = loader_with(&[("https://e.com/a.png", png_bytes(8192))]);
    let pipeline = ImagePipeline::new(builder(loader).build());
    let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap())
        .with_processors(vec![ProcessorHandle::new(IdentityProcessor)]);

    let (_handle, mut rx) = pipeline.subscribe_image(request).await;
    let mut saw_preview_before_final = false;
    let mut saw_final = false;
    while let Some(event) = rx.recv().await {
        match event {
            TaskEvent::Preview(_) if !saw_final => saw_preview_before_final = true,
            TaskEvent::Completed(Ok(_)) => {
                saw_final = true;
                break;
            }
            TaskEvent::Completed(Err(err)) => panic!("unexpected failure: {err}"),
            _ => {}
        }
    }
    assert!(saw_final);
    assert!(saw_preview_before_final, "identity processor supports progressive previews");
}

#[tokio::test]
async fn priority_can_be_raised_after_subscribing_without_panicking() {
    let loader = loader_with(&[("https://e.com/a.png", png_bytes(64))]);
    let pipeline = ImagePipeline::new(builder(loader).build());
    let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap()).with_priority(Priority::Low);

    let (handle, mut rx) = pipeline.subscribe_image(request).await;
    handle.set_priority(Priority::VeryHigh);
    while let Some(event) = rx.recv().await {
        if let TaskEvent::Completed(result) = event {
            assert!(result.is_ok());
            break;
        }
    }
}

#[tokio::test]
async fn round_trips_through_disk_cache_across_pipeline_instances() {
    let dir = tempfile::tempdir().unwrap();
    let loader = loader_with(&[("https://e.com/a.png", png_bytes(64))]);
    let disk_cache = Arc::new(DataCache::open(dir.path(), DiskCacheConfig::default()).await.unwrap());
    let pipeline = ImagePipeline::new(builder(loader).data_cache(disk_cache.clone()).build());
    let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());

    pipeline.load_image(request.clone()).await.unwrap();
    disk_cache.flush().await.unwrap();

    // A fresh pipeline, sharing only the disk cache, should find the bytes
    // without the (now-empty) static loader being consulted.
    let empty_loader = StaticDataLoader::new();
    let second_pipeline = ImagePipeline::new(
        builder(empty_loader)
            .data_cache(disk_cache)
            .image_cache(None)
            .build(),
    );
    let data_response = second_pipeline.load_data(request).await.unwrap();
    assert!(!data_response.bytes.is_empty());
}

#[tokio::test]
async fn missing_image_surfaces_a_data_loading_error_not_a_panic() {
    let loader = StaticDataLoader::new();
    let pipeline = ImagePipeline::new(builder(loader).build());
    let request = ImageRequest::new(Url::parse("https://e.com/missing.png").unwrap());
    let result = pipeline.load_image(request).await;
    assert!(matches!(result, Err(ImagePipelineError::DataLoadingFailed(_))));
}

#[tokio::test]
async fn prefetcher_warms_cache_ahead_of_a_foreground_load() {
    let loader = loader_with(&[("https://e.com/a.png", png_bytes(64))]);
    let pipeline = ImagePipeline::new(builder(loader).build());
    let prefetcher = image_pipeline::Prefetcher::new(pipeline.clone(), 2);
    let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());

    let _tokens = prefetcher.start_prefetching(vec![request.clone()], PrefetchDestination::MemoryCache);
    for _ in 0..200 {
        if pipeline.cached_image(&request).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let response = pipeline.load_image(request).await.unwrap();
    assert_eq!(response.source, image_pipeline::ResponseSource::Memory);
}
