use whoami_auth::{Config, build_rocket};

#[rocket::launch]
fn rocket() -> _ {
    let _ = dotenvy::dotenv();

    match Config::load() {
        Ok(config) => build_rocket(config),
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    }
}
