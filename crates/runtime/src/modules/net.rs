//! Network Module
//!
//! HTTP verbs over `ureq` and DNS resolution. Every call checks the
//! `net` capability against the URL's host; request bodies go out as
//! `application/json`. Responses come back as `{status, body}` maps
//! whatever the status code; transport failures raise `net` errors.

use std::net::ToSocketAddrs;

use glipt_core::Value;

use crate::permission::PermKind;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.define_module(
        "net",
        &[
            ("get", net_get, -1),
            ("post", net_post, -1),
            ("put", net_put, -1),
            ("delete", net_delete, -1),
            ("resolve", net_resolve, 1),
        ],
    );
}

/// Extract the host and check the capability; raises on failure.
fn check_host(vm: &mut Vm, url: &str) -> bool {
    let host = match url::Url::parse(url) {
        Ok(parsed) => parsed.host_str().map(str::to_owned),
        Err(_) => None,
    };
    let Some(host) = host else {
        vm.raise_error("Invalid URL", "net");
        return false;
    };
    if !vm.permissions.check(PermKind::Net, &host) {
        vm.raise_error(&format!("Permission denied: net \"{host}\""), "permission");
        return false;
    }
    true
}

fn request(vm: &mut Vm, method: &str, args: &[Value]) -> Value {
    let Some(url) = args.first().and_then(|v| vm.str_arg(*v)) else {
        return Value::NIL;
    };
    let url = url.to_owned();
    let body = args.get(1).and_then(|v| vm.str_arg(*v)).map(str::to_owned);

    if !check_host(vm, &url) {
        return Value::NIL;
    }

    let req = ureq::request(method, &url);
    let result = match body {
        Some(body) => req
            .set("Content-Type", "application/json")
            .send_string(&body),
        None => req.call(),
    };

    let response = match result {
        Ok(response) => response,
        // Non-2xx statuses still carry a usable response.
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => {
            vm.raise_error(&format!("Request failed: {err}"), "net");
            return Value::NIL;
        }
    };

    let status = response.status();
    let body = response.into_string().unwrap_or_default();

    let map = vm.new_map();
    vm.push(Value::object(map)); // protect while building
    vm.map_set_str(map, "status", Value::number(f64::from(status)));
    let body = vm.take_string(body);
    vm.map_set_str(map, "body", body);
    vm.pop();
    Value::object(map)
}

fn net_get(vm: &mut Vm, args: &[Value]) -> Value {
    request(vm, "GET", args)
}

fn net_post(vm: &mut Vm, args: &[Value]) -> Value {
    request(vm, "POST", args)
}

fn net_put(vm: &mut Vm, args: &[Value]) -> Value {
    request(vm, "PUT", args)
}

fn net_delete(vm: &mut Vm, args: &[Value]) -> Value {
    request(vm, "DELETE", args)
}

fn net_resolve(vm: &mut Vm, args: &[Value]) -> Value {
    let Some(host) = vm.str_arg(args[0]) else {
        return Value::NIL;
    };
    let host = host.to_owned();

    if !vm.permissions.check(PermKind::Net, &host) {
        vm.raise_error(&format!("Permission denied: net \"{host}\""), "permission");
        return Value::NIL;
    }

    let addrs = match (host.as_str(), 0u16).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => {
            vm.raise_error("DNS resolution failed", "net");
            return Value::NIL;
        }
    };

    let mut ips: Vec<String> = Vec::new();
    for addr in addrs {
        let ip = addr.ip().to_string();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    let list = vm.new_list();
    vm.push(Value::object(list)); // protect across interning
    for ip in ips {
        let ip = vm.take_string(ip);
        vm.heap.list_mut(list).items.push(ip);
    }
    vm.pop();
    Value::object(list)
}
