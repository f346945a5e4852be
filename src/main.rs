use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    incident_map_server::run_server().await
}
