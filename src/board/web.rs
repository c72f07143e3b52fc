use std::sync::Arc;

use anyhow::Result;
use embedded_svc::http::{Headers, Method};
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use log::info;

use segclock::http::{self, Reply, MAX_FORM_BODY};

use super::TzConfig;

const HTTP_STACK: usize = 10 * 1024;

fn respond(req: Request<&mut EspHttpConnection<'_>>, reply: Reply) -> Result<()> {
    req.into_response(
        reply.status,
        Some(reply.reason()),
        &[("Content-Type", reply.content_type)],
    )?
    .write_all(reply.body.as_bytes())?;
    Ok(())
}

fn read_form_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> Result<Option<Vec<u8>>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_FORM_BODY {
        return Ok(None);
    }
    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(Some(body))
}

pub fn start(config: Arc<TzConfig>) -> Result<EspHttpServer<'static>> {
    let conf = Configuration {
        stack_size: HTTP_STACK,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    {
        let config = config.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            respond(req, http::index(config.state()))
        })?;
    }

    {
        let config = config.clone();
        server.fn_handler::<anyhow::Error, _>("/getTime", Method::Get, move |req| {
            respond(req, http::get_time(config.state()))
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/setTimezone", Method::Post, move |mut req| {
        let reply = match read_form_body(&mut req)? {
            Some(body) => http::set_timezone(&*config, &body),
            None => Reply::page(400, "Request too large"),
        };
        respond(req, reply)
    })?;

    info!("HTTP server started on port 80");
    Ok(server)
}
