#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    let rocket = portal_api::rocket();
    log::info!("Starting portal API server");
    rocket
}
