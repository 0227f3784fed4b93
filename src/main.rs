use std::{env, time::Instant};

use pagescan::{Language, PageReaderBuilder};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

fn main() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let image_path = args
        .next()
        .unwrap_or_else(|| "tests/data/test_page.png".into());
    let language = args.next().unwrap_or_else(|| "latin".into());

    let image = image::open(&image_path).expect("Failed to load page image");
    let reader = PageReaderBuilder::new()
        .det_model("models/det.onnx")
        .rec_model("models/rec.onnx")
        .language(Language::from_name(&language))
        .build()
        .expect("Failed to build engine");

    let start = Instant::now();
    let lines = reader.read(&image).expect("Failed recognition.");
    let end = start.elapsed();
    log::debug!("{end:?}");

    for line in lines {
        let bounds = line.line.bounds;
        match line.text {
            Ok(text) => println!(
                "{:>3} [{}, {}, {}x{}] {:.3} {}",
                line.line.id, bounds.x, bounds.y, bounds.width, bounds.height, text.probability, text.text
            ),
            Err(err) => println!("{:>3} error: {err}", line.line.id),
        }
    }
}
