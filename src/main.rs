#[tokio::main]
async fn main() {
    if let Err(e) = synopsis::run().await {
        eprintln!("synopsis: {}", e);
        std::process::exit(1);
    }
}
