fn main() -> Result<(), aap2mqtt_lib::error::Error> {
    aap2mqtt_lib::run_wizard()
}
