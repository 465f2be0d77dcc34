#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dance_studio_api::run().await
}
